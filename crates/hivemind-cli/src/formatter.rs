//! Rendering command results as pretty text or JSON.

use anyhow::Result;
use serde_json::Value;

use hivemind_context::{ContextEntry, ContextNode};

use crate::theme::Theme;

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    /// Colored, human-readable.
    Pretty,
    /// One JSON document on stdout.
    Json,
}

impl OutputFormat {
    pub(crate) fn parse(raw: &str) -> Self {
        match raw {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

fn pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn indented(text: &str) -> String {
    text.lines()
        .map(|l| format!("    {l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn render_node(node: &ContextNode) -> String {
    let tags = if node.tags.is_empty() {
        Theme::dimmed("(none)")
    } else {
        node.tags.iter().cloned().collect::<Vec<_>>().join(", ")
    };
    let mut lines = vec![
        Theme::header(&node.id),
        Theme::field("type", &node.node_type),
        Theme::field("version", &node.version.to_string()),
        Theme::field(
            "parent",
            node.parent_id.as_deref().unwrap_or(&Theme::dimmed("(none)")),
        ),
        Theme::field("tags", &tags),
        Theme::field("created", &node.created_at.to_rfc3339()),
        Theme::field("updated", &node.updated_at.to_rfc3339()),
        Theme::field("data", ""),
        indented(&pretty_json(&Value::Object(node.data.clone()))),
    ];
    if !node.metadata.is_empty() {
        lines.push(Theme::field("metadata", ""));
        lines.push(indented(&pretty_json(&Value::Object(node.metadata.clone()))));
    }
    lines.join("\n")
}

pub(crate) fn render_entry(entry: &ContextEntry) -> String {
    [
        Theme::header(entry.context_id()),
        Theme::field("agent", entry.agent_id()),
        Theme::field("timestamp", &entry.metadata.timestamp),
        Theme::field("data", ""),
        indented(&pretty_json(&entry.data)),
    ]
    .join("\n")
}

/// Print one serializable value.
pub(crate) fn print_value<T: serde::Serialize>(
    format: OutputFormat,
    value: &T,
    pretty: impl FnOnce(&T) -> String,
) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Pretty => println!("{}", pretty(value)),
    }
    Ok(())
}

/// Print a list, separated by rules in pretty mode.
pub(crate) fn print_list<T: serde::Serialize>(
    format: OutputFormat,
    items: &[T],
    empty: &str,
    pretty: impl Fn(&T) -> String,
) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(items)?),
        OutputFormat::Pretty if items.is_empty() => println!("{}", Theme::dimmed(empty)),
        OutputFormat::Pretty => {
            let rendered: Vec<String> = items.iter().map(pretty).collect();
            println!("{}", rendered.join(&format!("\n{}\n", Theme::separator())));
        },
    }
    Ok(())
}

/// Print the outcome of a mutation.
pub(crate) fn print_outcome(format: OutputFormat, message: &str, json: &Value) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(json)?),
        OutputFormat::Pretty => println!("{}", Theme::success(message)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use hivemind_context::NewContext;

    use super::*;

    #[test]
    fn test_render_node_lists_fields() {
        colored::control::set_override(false);
        let node = ContextNode::create(
            "ctx_1",
            NewContext::new(hivemind_test::object(json!({"k": "v"})))
                .with_type("task")
                .with_tags(["b", "a"]),
            Utc::now(),
        );
        let text = render_node(&node);
        assert!(text.contains("ctx_1"));
        assert!(text.contains("task"));
        assert!(text.contains("a, b"));
        assert!(text.contains("\"k\": \"v\""));
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(OutputFormat::parse("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("pretty"), OutputFormat::Pretty);
        assert_eq!(OutputFormat::parse("other"), OutputFormat::Pretty);
    }
}
