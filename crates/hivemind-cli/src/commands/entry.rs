//! `hivemind entry`: flat agent entries.

use anyhow::{Result, bail};
use serde_json::json;

use hivemind_context::ContextManager;

use super::{parse_json, ttl_from_secs};
use crate::formatter::{OutputFormat, print_list, print_outcome, print_value, render_entry};

pub(crate) async fn put(
    manager: &ContextManager,
    agent_id: &str,
    data: &str,
    ttl: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    let data = parse_json(data, "DATA")?;
    let Some(id) = manager.update(agent_id, data, ttl_from_secs(ttl)?).await else {
        bail!("entry could not be stored, see the log for details");
    };
    print_outcome(
        format,
        &format!("Stored {id}"),
        &json!({ "context_id": id, "agent_id": agent_id }),
    )
}

pub(crate) async fn get(manager: &ContextManager, id: &str, format: OutputFormat) -> Result<()> {
    let Some(entry) = manager.get(id).await else {
        bail!("entry {id} not found");
    };
    print_value(format, &entry, render_entry)
}

pub(crate) async fn search(
    manager: &ContextManager,
    agent_id: Option<&str>,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let entries = manager.search(agent_id, limit).await;
    print_list(format, &entries, "No entries", render_entry)
}

pub(crate) async fn clear(
    manager: &ContextManager,
    id: Option<&str>,
    all: bool,
    format: OutputFormat,
) -> Result<()> {
    match (id, all) {
        (Some(_), true) => bail!("pass an entry id or --all, not both"),
        (None, false) => bail!("pass an entry id, or --all to clear the namespace"),
        (Some(id), false) => {
            if !manager.clear(Some(id)).await {
                bail!("entry {id} not found");
            }
            print_outcome(format, &format!("Cleared {id}"), &json!({ "cleared": id }))
        },
        (None, true) => {
            if !manager.clear(None).await {
                bail!("namespace could not be cleared, see the log for details");
            }
            let namespace = &manager.options().namespace;
            print_outcome(
                format,
                &format!("Cleared namespace {namespace}"),
                &json!({ "cleared_namespace": namespace }),
            )
        },
    }
}

#[cfg(test)]
mod tests {
    use hivemind_test::memory_manager;

    use super::*;

    #[tokio::test]
    async fn test_put_search_clear() {
        let manager = memory_manager();
        put(&manager, "scout", r#"{"px": 1}"#, None, OutputFormat::Json)
            .await
            .unwrap();
        put(&manager, "scout", "42", Some(60), OutputFormat::Json)
            .await
            .unwrap();
        assert_eq!(manager.search(Some("scout"), 10).await.len(), 2);

        search(&manager, Some("scout"), 10, OutputFormat::Json)
            .await
            .unwrap();
        clear(&manager, None, true, OutputFormat::Json).await.unwrap();
        assert!(manager.search(None, 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_needs_exactly_one_target() {
        let manager = memory_manager();
        assert!(clear(&manager, None, false, OutputFormat::Json).await.is_err());
        assert!(
            clear(&manager, Some("abc"), true, OutputFormat::Json)
                .await
                .is_err()
        );
        assert!(
            clear(&manager, Some("abc"), false, OutputFormat::Json)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_put_rejects_bad_json() {
        let manager = memory_manager();
        assert!(put(&manager, "a", "{oops", None, OutputFormat::Json).await.is_err());
        assert!(put(&manager, "", "1", None, OutputFormat::Json).await.is_err());
    }
}
