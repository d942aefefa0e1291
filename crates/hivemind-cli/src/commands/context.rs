//! `hivemind context`: hierarchical nodes.

use anyhow::{Result, bail};
use serde_json::json;

use hivemind_context::{ContextManager, ContextUpdate, NewContext};

use super::{parse_object, ttl_from_secs};
use crate::formatter::{OutputFormat, print_list, print_outcome, print_value, render_node};

/// Arguments of `context create`.
#[derive(Debug, Default)]
pub(crate) struct CreateArgs {
    pub(crate) data: Option<String>,
    pub(crate) node_type: Option<String>,
    pub(crate) parent: Option<String>,
    pub(crate) tags: Vec<String>,
    pub(crate) metadata: Option<String>,
    pub(crate) ttl: Option<u64>,
}

/// Arguments of `context update`.
#[derive(Debug, Default)]
pub(crate) struct UpdateArgs {
    pub(crate) data: Option<String>,
    pub(crate) tags: Vec<String>,
    pub(crate) remove_tags: Vec<String>,
    pub(crate) metadata: Option<String>,
    pub(crate) ttl: Option<u64>,
}

pub(crate) async fn create(
    manager: &ContextManager,
    args: CreateArgs,
    format: OutputFormat,
) -> Result<()> {
    let data = match args.data.as_deref() {
        Some(raw) => parse_object(raw, "--data")?,
        None => hivemind_context::JsonMap::new(),
    };
    let mut new = NewContext::new(data).with_tags(args.tags);
    if let Some(node_type) = args.node_type {
        new = new.with_type(node_type);
    }
    if let Some(parent) = args.parent {
        new = new.with_parent(parent);
    }
    if let Some(raw) = args.metadata.as_deref() {
        new = new.with_metadata(parse_object(raw, "--metadata")?);
    }
    if let Some(ttl) = ttl_from_secs(args.ttl)? {
        new = new.with_ttl(ttl);
    }

    let Some(id) = manager.create_context(new).await else {
        bail!("context could not be created, see the log for details");
    };
    print_outcome(format, &format!("Created {id}"), &json!({ "id": id }))
}

pub(crate) async fn get(manager: &ContextManager, id: &str, format: OutputFormat) -> Result<()> {
    let Some(node) = manager.get_context(id).await else {
        bail!("context {id} not found");
    };
    print_value(format, &node, render_node)
}

pub(crate) async fn update(
    manager: &ContextManager,
    id: &str,
    args: UpdateArgs,
    format: OutputFormat,
) -> Result<()> {
    let mut update = ContextUpdate::new().with_tags(args.tags);
    for tag in args.remove_tags {
        update = update.without_tag(tag);
    }
    if let Some(raw) = args.data.as_deref() {
        update = update.with_data(parse_object(raw, "--data")?);
    }
    if let Some(raw) = args.metadata.as_deref() {
        update = update.with_metadata(parse_object(raw, "--metadata")?);
    }
    if let Some(ttl) = ttl_from_secs(args.ttl)? {
        update = update.with_ttl(ttl);
    }

    if !manager.update_context(id, update).await {
        bail!("context {id} was not updated (missing or unwritable)");
    }
    updated(manager, id, format).await
}

pub(crate) async fn tag(
    manager: &ContextManager,
    id: &str,
    tag: &str,
    remove: bool,
    format: OutputFormat,
) -> Result<()> {
    let ok = if remove {
        manager.remove_tag(id, tag).await
    } else {
        manager.add_tag(id, tag).await
    };
    if !ok {
        bail!("context {id} was not updated (missing or unwritable)");
    }
    updated(manager, id, format).await
}

async fn updated(manager: &ContextManager, id: &str, format: OutputFormat) -> Result<()> {
    let version = manager.get_context(id).await.map(|n| n.version);
    let message = match version {
        Some(v) => format!("Updated {id} (version {v})"),
        None => format!("Updated {id}"),
    };
    print_outcome(format, &message, &json!({ "id": id, "version": version }))
}

pub(crate) async fn delete(manager: &ContextManager, id: &str, format: OutputFormat) -> Result<()> {
    if !manager.delete_context(id).await {
        bail!("context {id} not found");
    }
    let message = if manager.backend().cascades_deletes() {
        format!("Deleted {id} and its descendants")
    } else {
        format!("Deleted {id}")
    };
    print_outcome(format, &message, &json!({ "id": id, "deleted": true }))
}

pub(crate) async fn find(
    manager: &ContextManager,
    tag: Option<&str>,
    node_type: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let nodes = match (tag, node_type) {
        (Some(tag), None) => manager.find_contexts_by_tag(tag).await,
        (None, Some(node_type)) => manager.find_contexts_by_type(node_type).await,
        (Some(tag), Some(node_type)) => manager
            .find_contexts_by_tag(tag)
            .await
            .into_iter()
            .filter(|n| n.node_type == node_type)
            .collect(),
        (None, None) => bail!("pass --tag or --type"),
    };
    print_list(format, &nodes, "No matching contexts", render_node)
}

pub(crate) async fn children(
    manager: &ContextManager,
    id: &str,
    format: OutputFormat,
) -> Result<()> {
    let nodes = manager.get_children(id).await;
    print_list(format, &nodes, "No children", render_node)
}

#[cfg(test)]
mod tests {
    use hivemind_test::memory_manager;

    use super::*;

    #[tokio::test]
    async fn test_create_then_find() {
        let manager = memory_manager();
        create(
            &manager,
            CreateArgs {
                data: Some(r#"{"q": 1}"#.into()),
                node_type: Some("task".into()),
                tags: vec!["pricing".into()],
                ..CreateArgs::default()
            },
            OutputFormat::Json,
        )
        .await
        .unwrap();

        let found = manager.find_contexts_by_tag("pricing").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].node_type, "task");
        find(&manager, Some("pricing"), Some("task"), OutputFormat::Json)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_context_is_an_error() {
        let manager = memory_manager();
        assert!(get(&manager, "ctx_nope", OutputFormat::Json).await.is_err());
        assert!(delete(&manager, "ctx_nope", OutputFormat::Json).await.is_err());
        assert!(
            tag(&manager, "ctx_nope", "x", false, OutputFormat::Json)
                .await
                .is_err()
        );
        assert!(find(&manager, None, None, OutputFormat::Json).await.is_err());
    }

    #[tokio::test]
    async fn test_create_rejects_non_object_data() {
        let manager = memory_manager();
        let args = CreateArgs {
            data: Some("[1, 2]".into()),
            ..CreateArgs::default()
        };
        assert!(create(&manager, args, OutputFormat::Json).await.is_err());
    }
}
