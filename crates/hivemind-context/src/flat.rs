//! Flat mode: agent-scoped entries with a bounded per-agent history.
//!
//! Entries live at `{namespace}:{context_id}`; each agent's history is a
//! most-recent-first JSON list of ids at `{namespace}:agent:{agent_id}:history`.
//! Ids evicted from a history stay readable until they expire or are cleared.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use hivemind_storage::{StorageError, StorageResult};

use crate::entry::ContextEntry;
use crate::manager::ContextManager;

const HISTORY_PREFIX: &str = "agent:";

fn history_key(agent_id: &str) -> String {
    format!("{HISTORY_PREFIX}{agent_id}:history")
}

impl ContextManager {
    /// Store `data` as a new entry from `agent_id` and return its id.
    ///
    /// Without `ttl` the configured default applies, if any. Returns `None`
    /// if the entry or the agent's history could not be written.
    pub async fn update(&self, agent_id: &str, data: Value, ttl: Option<Duration>) -> Option<String> {
        if agent_id.is_empty() {
            warn!(operation = "update", "Refusing entry without an agent id");
            return None;
        }

        let mut state = self.update_lock.lock().await;
        let timestamp = state
            .next_entry_time(Utc::now())
            .to_rfc3339_opts(SecondsFormat::Nanos, true);
        let entry = ContextEntry::new(agent_id, timestamp, data);
        let context_id = entry.context_id().to_string();
        let ttl = ttl.or(self.options.default_ttl);

        match self.entries.set_json(&context_id, &entry, ttl).await {
            Ok(true) => {},
            Ok(false) => {
                warn!(
                    operation = "update",
                    key = %self.entries.full_key(&context_id),
                    backend = self.backend.name(),
                    "Backend rejected entry write"
                );
                return None;
            },
            Err(e) => {
                self.report("update", &self.entries.full_key(&context_id), &e);
                return None;
            },
        }

        let key = history_key(agent_id);
        if let Err(e) = self.push_history(&key, &context_id).await {
            self.report("update", &self.entries.full_key(&key), &e);
            return None;
        }
        drop(state);

        debug!(agent_id, key = %context_id, "Stored context entry");
        Some(context_id)
    }

    async fn push_history(&self, key: &str, context_id: &str) -> StorageResult<()> {
        let mut history: Vec<String> = match self.entries.get_json(key).await {
            Ok(history) => history.unwrap_or_default(),
            Err(StorageError::Serialization(e)) => {
                warn!(key, error = %e, "Agent history is corrupt, starting a new one");
                Vec::new()
            },
            Err(e) => return Err(e),
        };
        history.insert(0, context_id.to_string());
        history.truncate(self.options.history_limit);
        self.entries.set_json(key, &history, None).await.map(|_| ())
    }

    /// Fetch one entry by id.
    pub async fn get(&self, context_id: &str) -> Option<ContextEntry> {
        match self.entries.get_json(context_id).await {
            Ok(entry) => entry,
            Err(e) => {
                self.report("get", &self.entries.full_key(context_id), &e);
                None
            },
        }
    }

    /// Up to `limit` entries.
    ///
    /// With an agent, walks that agent's history most-recent-first and skips
    /// ids whose entry has expired or been cleared. Without one, returns
    /// entries in the backend's key order.
    pub async fn search(&self, agent_id: Option<&str>, limit: usize) -> Vec<ContextEntry> {
        if limit == 0 {
            return Vec::new();
        }

        let ids: Vec<String> = match agent_id {
            Some(agent) => {
                let key = history_key(agent);
                match self.entries.get_json(&key).await {
                    Ok(history) => history.unwrap_or_default(),
                    Err(e) => {
                        self.report("search", &self.entries.full_key(&key), &e);
                        return Vec::new();
                    },
                }
            },
            None => match self.entries.keys("*").await {
                Ok(keys) => keys
                    .into_iter()
                    .filter(|k| !k.starts_with(HISTORY_PREFIX))
                    .collect(),
                Err(e) => {
                    self.report("search", self.entries.namespace(), &e);
                    return Vec::new();
                },
            },
        };

        let mut results = Vec::with_capacity(limit.min(ids.len()));
        for id in ids {
            if results.len() >= limit {
                break;
            }
            if let Some(entry) = self.get(&id).await {
                results.push(entry);
            }
        }
        results
    }

    /// Delete one entry, or with `None` every key in the namespace
    /// (entries and histories).
    ///
    /// Returns whether the entry existed, or for a full clear whether the
    /// backend accepted it.
    pub async fn clear(&self, context_id: Option<&str>) -> bool {
        let _guard = self.update_lock.lock().await;
        match context_id {
            Some(id) => match self.entries.delete(id).await {
                Ok(deleted) => deleted,
                Err(e) => {
                    self.report("clear", &self.entries.full_key(id), &e);
                    false
                },
            },
            None => match self.entries.clear().await {
                Ok(removed) => {
                    info!(namespace = self.entries.namespace(), removed, "Cleared namespace");
                    true
                },
                Err(e) => {
                    self.report("clear", self.entries.namespace(), &e);
                    false
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use hivemind_storage::MemoryBackend;

    use super::*;
    use crate::manager::ManagerOptions;

    fn manager_with(options: ManagerOptions) -> ContextManager {
        ContextManager::with_options(Arc::new(MemoryBackend::new()), options).unwrap()
    }

    fn manager() -> ContextManager {
        manager_with(ManagerOptions::default())
    }

    #[tokio::test]
    async fn test_update_and_get() {
        let manager = manager();
        let id = manager.update("vault", json!({"tvl": 10}), None).await.unwrap();

        assert_eq!(id.len(), 64);
        let entry = manager.get(&id).await.unwrap();
        assert_eq!(entry.data, json!({"tvl": 10}));
        assert_eq!(entry.agent_id(), "vault");
        assert_eq!(entry.metadata.version, "1.0");
        assert_eq!(
            crate::entry::entry_id("vault", &entry.metadata.timestamp),
            id
        );
        assert!(
            manager
                .backend()
                .exists(&format!("mcp:{id}"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_same_tick_updates_get_distinct_ids() {
        let manager = manager();
        let a = manager.update("a", json!(1), None).await.unwrap();
        let b = manager.update("a", json!(1), None).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_history_is_most_recent_first_and_bounded() {
        let manager = manager_with(ManagerOptions {
            history_limit: 3,
            ..ManagerOptions::default()
        });
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(manager.update("a", json!({"i": i}), None).await.unwrap());
        }

        let found: Vec<String> = manager
            .search(Some("a"), 10)
            .await
            .iter()
            .map(|e| e.context_id().to_string())
            .collect();
        assert_eq!(found, vec![ids[4].clone(), ids[3].clone(), ids[2].clone()]);
        // Evicted from the index, not from storage.
        assert!(manager.get(&ids[0]).await.is_some());
    }

    #[tokio::test]
    async fn test_search_skips_cleared_entries() {
        let manager = manager();
        let first = manager.update("a", json!(1), None).await.unwrap();
        let second = manager.update("a", json!(2), None).await.unwrap();
        assert!(manager.clear(Some(&second)).await);
        assert!(!manager.clear(Some(&second)).await);

        let found = manager.search(Some("a"), 10).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].context_id(), first);
    }

    #[tokio::test]
    async fn test_search_without_agent_excludes_histories() {
        let manager = manager();
        manager.update("a", json!(1), None).await.unwrap();
        manager.update("b", json!(2), None).await.unwrap();
        manager.update("b", json!(3), None).await.unwrap();

        assert_eq!(manager.search(None, 10).await.len(), 3);
        assert_eq!(manager.search(None, 2).await.len(), 2);
        assert!(manager.search(None, 0).await.is_empty());
        assert!(manager.search(Some("nobody"), 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_all_leaves_nodes_alone() {
        let manager = manager();
        manager.update("a", json!(1), None).await.unwrap();
        let node = manager
            .create_context(crate::NewContext::default())
            .await
            .unwrap();

        assert!(manager.clear(None).await);
        assert!(manager.search(None, 10).await.is_empty());
        assert!(manager.search(Some("a"), 10).await.is_empty());
        assert!(manager.get_context(&node).await.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_history_is_replaced() {
        let manager = manager();
        manager
            .backend()
            .set("mcp:agent:a:history", &json!({"not": "a list"}), None)
            .await
            .unwrap();
        let id = manager.update("a", json!(1), None).await.unwrap();
        let found = manager.search(Some("a"), 10).await;
        assert_eq!(found[0].context_id(), id);
    }

    #[tokio::test]
    async fn test_empty_agent_rejected() {
        assert!(manager().update("", json!(1), None).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_ttl_applies() {
        let manager = manager_with(ManagerOptions {
            default_ttl: Some(Duration::from_secs(5)),
            ..ManagerOptions::default()
        });
        let short = manager.update("a", json!(1), None).await.unwrap();
        let long = manager
            .update("a", json!(2), Some(Duration::from_secs(60)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(manager.get(&short).await.is_none());
        assert!(manager.get(&long).await.is_some());
        assert_eq!(manager.search(Some("a"), 10).await.len(), 1);
    }
}
