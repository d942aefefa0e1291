//! Node lifecycle over any [`ContextBackend`].
//!
//! Every mutation runs its whole read-modify-write under one process-wide
//! update lock, so two concurrent updates can never lose each other's
//! changes within a single manager. Reads take no lock. Backend failures are
//! logged with `operation`, `key` and `backend` fields and surface as
//! `None`, `false` or an empty list.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use hivemind_config::StoreConfig;
use hivemind_storage::{
    CHILD_RELATIONSHIP, ContextBackend, NODE_KEY_PREFIX, ScopedBackend, StorageError,
    StorageResult, TtlStatus,
};

use crate::error::{ContextError, ContextResult};
use crate::node::{ContextNode, ContextUpdate, NewContext, generate_node_id};

/// Namespace for flat entries when none is configured.
pub const DEFAULT_NAMESPACE: &str = "mcp";

/// Per-agent history length when none is configured.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Manager behaviour that does not depend on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Key namespace for flat entries and agent histories.
    pub namespace: String,
    /// How many entry ids each agent history keeps.
    pub history_limit: usize,
    /// TTL for flat entries written without one.
    pub default_ttl: Option<Duration>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            default_ttl: None,
        }
    }
}

impl From<&StoreConfig> for ManagerOptions {
    fn from(store: &StoreConfig) -> Self {
        Self {
            namespace: store.namespace.clone(),
            history_limit: store.history_limit,
            default_ttl: store.default_ttl(),
        }
    }
}

/// State owned by whoever holds the update lock.
#[derive(Debug, Default)]
pub(crate) struct UpdateState {
    last_entry_time: Option<DateTime<Utc>>,
}

impl UpdateState {
    /// A write time strictly after every one handed out before.
    pub(crate) fn next_entry_time(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let next = match self.last_entry_time {
            Some(last) if now <= last => last
                .checked_add_signed(TimeDelta::nanoseconds(1))
                .unwrap_or(now),
            _ => now,
        };
        self.last_entry_time = Some(next);
        next
    }
}

/// Orchestrates context nodes and flat entries on one backend.
pub struct ContextManager {
    pub(crate) backend: Arc<dyn ContextBackend>,
    pub(crate) entries: ScopedBackend,
    pub(crate) options: ManagerOptions,
    pub(crate) update_lock: Mutex<UpdateState>,
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("backend", &self.backend.name())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ContextManager {
    /// A manager with default options.
    ///
    /// # Errors
    ///
    /// Never fails with default options; the signature matches
    /// [`with_options`](Self::with_options).
    pub fn new(backend: Arc<dyn ContextBackend>) -> ContextResult<Self> {
        Self::with_options(backend, ManagerOptions::default())
    }

    /// A manager with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidOptions`] for a zero history limit, or
    /// a storage error for an unusable namespace.
    pub fn with_options(
        backend: Arc<dyn ContextBackend>,
        options: ManagerOptions,
    ) -> ContextResult<Self> {
        if options.history_limit == 0 {
            return Err(ContextError::InvalidOptions(
                "history_limit must be at least 1".into(),
            ));
        }
        let entries = ScopedBackend::new(Arc::clone(&backend), options.namespace.clone())?;
        Ok(Self {
            backend,
            entries,
            options,
            update_lock: Mutex::new(UpdateState::default()),
        })
    }

    /// The backend this manager writes to.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn ContextBackend> {
        &self.backend
    }

    /// The options this manager was built with.
    #[must_use]
    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub(crate) fn report(&self, operation: &'static str, key: &str, err: &StorageError) {
        warn!(
            operation,
            key,
            backend = self.backend.name(),
            error = %err,
            "Context store operation failed"
        );
    }

    async fn load_node(&self, id: &str) -> StorageResult<Option<ContextNode>> {
        match self.backend.get(id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn store_node(&self, node: &ContextNode, ttl: Option<Duration>) -> StorageResult<bool> {
        let value = serde_json::to_value(node)?;
        self.backend.set(&node.id, &value, ttl).await
    }

    // -- Hierarchical mode --

    /// Create a node and return its id.
    ///
    /// When `parent_id` is set the parent/child link is registered
    /// best-effort: a missing parent is logged and the child still exists.
    /// Returns `None` only when the node itself could not be written.
    pub async fn create_context(&self, new: NewContext) -> Option<String> {
        let id = generate_node_id();
        let ttl = new.ttl;
        let node = ContextNode::create(id.clone(), new, Utc::now());

        match self.store_node(&node, ttl).await {
            Ok(true) => {},
            Ok(false) => {
                warn!(
                    operation = "create_context",
                    key = %id,
                    backend = self.backend.name(),
                    "Backend rejected node write"
                );
                return None;
            },
            Err(e) => {
                self.report("create_context", &id, &e);
                return None;
            },
        }

        if let Some(parent_id) = node.parent_id.as_deref() {
            self.link_child(parent_id, &id).await;
        }

        debug!(key = %id, node_type = %node.node_type, "Created context");
        Some(id)
    }

    async fn link_child(&self, parent_id: &str, child_id: &str) {
        let _guard = self.update_lock.lock().await;
        match self.backend.exists(parent_id).await {
            Ok(true) => {},
            Ok(false) => {
                warn!(parent_id, child_id, "Parent context not found, child left unlinked");
                return;
            },
            Err(e) => {
                self.report("add_relationship", parent_id, &e);
                return;
            },
        }
        match self
            .backend
            .add_relationship(parent_id, child_id, CHILD_RELATIONSHIP)
            .await
        {
            Ok(true) => debug!(parent_id, child_id, "Linked child context"),
            Ok(false) => warn!(parent_id, child_id, "Backend refused relationship"),
            Err(e) => self.report("add_relationship", parent_id, &e),
        }
    }

    /// Fetch a node. Missing, undecodable and unreachable all read as `None`.
    pub async fn get_context(&self, id: &str) -> Option<ContextNode> {
        match self.load_node(id).await {
            Ok(node) => node,
            Err(e) => {
                self.report("get_context", id, &e);
                None
            },
        }
    }

    /// Merge `update` into a node as one new version.
    ///
    /// Returns `false` if the node does not exist or could not be written.
    pub async fn update_context(&self, id: &str, update: ContextUpdate) -> bool {
        self.apply_update("update_context", id, move |_| update).await
    }

    /// Compute an update from the current node and apply it atomically.
    ///
    /// `f` runs under the update lock, so it always sees the latest version.
    pub async fn modify_context<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&ContextNode) -> ContextUpdate + Send,
    {
        self.apply_update("modify_context", id, f).await
    }

    /// Add a tag. Re-adding a present tag still counts as an update.
    pub async fn add_tag(&self, id: &str, tag: &str) -> bool {
        let tag = tag.to_string();
        self.apply_update("add_tag", id, move |_| ContextUpdate::new().with_tag(tag))
            .await
    }

    /// Remove a tag. Removing an absent tag still counts as an update.
    pub async fn remove_tag(&self, id: &str, tag: &str) -> bool {
        let tag = tag.to_string();
        self.apply_update("remove_tag", id, move |_| {
            ContextUpdate::new().without_tag(tag)
        })
        .await
    }

    async fn apply_update<F>(&self, operation: &'static str, id: &str, f: F) -> bool
    where
        F: FnOnce(&ContextNode) -> ContextUpdate + Send,
    {
        let _guard = self.update_lock.lock().await;

        let mut node = match self.load_node(id).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                debug!(operation, key = id, "Context not found");
                return false;
            },
            Err(e) => {
                self.report(operation, id, &e);
                return false;
            },
        };

        let update = f(&node);
        node.apply(&update, Utc::now());

        // A plain SET would drop the key's expiry, so carry it over.
        let ttl = match update.ttl {
            Some(ttl) => Some(ttl),
            None => self.remaining_ttl(id).await,
        };

        match self.store_node(&node, ttl).await {
            Ok(stored) => {
                if stored {
                    debug!(operation, key = id, version = node.version, "Updated context");
                }
                stored
            },
            Err(e) => {
                self.report(operation, id, &e);
                false
            },
        }
    }

    async fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        match self.backend.ttl(key).await {
            Ok(TtlStatus::Expires(left)) => Some(left),
            Ok(TtlStatus::Persistent | TtlStatus::Missing) => None,
            Err(e) => {
                debug!(key, error = %e, "Could not read remaining TTL");
                None
            },
        }
    }

    /// Delete a node. Returns `false` if it did not exist.
    ///
    /// Relational backends cascade to descendants. Elsewhere children stay
    /// readable by id, and the relationship index entries are dropped.
    pub async fn delete_context(&self, id: &str) -> bool {
        let cascades = self.backend.cascades_deletes();
        let parent_id = if cascades {
            None
        } else {
            self.load_node(id)
                .await
                .ok()
                .flatten()
                .and_then(|node| node.parent_id)
        };

        match self.backend.delete(id).await {
            Ok(true) => {},
            Ok(false) => return false,
            Err(e) => {
                self.report("delete_context", id, &e);
                return false;
            },
        }

        if !cascades {
            let _guard = self.update_lock.lock().await;
            if let Err(e) = self.backend.clear_relationships(id).await {
                self.report("delete_context", id, &e);
            }
            if let Some(parent_id) = parent_id.as_deref()
                && let Err(e) = self.backend.remove_relationship(parent_id, id).await
            {
                self.report("delete_context", parent_id, &e);
            }
        }

        info!(key = id, cascaded = cascades, "Deleted context");
        true
    }

    /// Nodes carrying `tag`. Uses the backend's tag index when it has one,
    /// otherwise scans every node.
    pub async fn find_contexts_by_tag(&self, tag: &str) -> Vec<ContextNode> {
        let indexed = self.backend.find_by_tag(tag).await;
        self.collect_nodes("find_contexts_by_tag", tag, indexed, |node| {
            node.has_tag(tag)
        })
        .await
    }

    /// Nodes of `node_type`, indexed when possible.
    pub async fn find_contexts_by_type(&self, node_type: &str) -> Vec<ContextNode> {
        let indexed = self.backend.find_by_type(node_type).await;
        self.collect_nodes("find_contexts_by_type", node_type, indexed, |node| {
            node.node_type == node_type
        })
        .await
    }

    /// Live children of `id`, oldest link first. Children that were deleted
    /// or expired are skipped.
    pub async fn get_children(&self, id: &str) -> Vec<ContextNode> {
        let links = match self.backend.children(id).await {
            Ok(links) => links,
            Err(e) => {
                self.report("get_children", id, &e);
                return Vec::new();
            },
        };

        let mut children = Vec::with_capacity(links.len());
        for link in links {
            match self.load_node(&link.child_id).await {
                Ok(Some(child)) => children.push(child),
                Ok(None) => {
                    debug!(parent_id = id, child_id = %link.child_id, "Skipping dangling child");
                },
                Err(e) => self.report("get_children", &link.child_id, &e),
            }
        }
        children
    }

    async fn collect_nodes<P>(
        &self,
        operation: &'static str,
        key: &str,
        indexed: StorageResult<Option<Vec<String>>>,
        matches: P,
    ) -> Vec<ContextNode>
    where
        P: Fn(&ContextNode) -> bool + Send + Sync,
    {
        let (ids, scanned) = match indexed {
            Ok(Some(ids)) => (ids, false),
            Ok(None) => match self.backend.keys(&format!("{NODE_KEY_PREFIX}*")).await {
                Ok(keys) => (keys, true),
                Err(e) => {
                    self.report(operation, key, &e);
                    return Vec::new();
                },
            },
            Err(e) => {
                self.report(operation, key, &e);
                return Vec::new();
            },
        };

        let mut nodes = Vec::new();
        for id in ids {
            match self.load_node(&id).await {
                Ok(Some(node)) if matches(&node) => nodes.push(node),
                Ok(_) => {},
                Err(e) if scanned => debug!(key = %id, error = %e, "Skipping unreadable key"),
                Err(e) => self.report(operation, &id, &e),
            }
        }
        nodes
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use hivemind_storage::{MemoryBackend, RelationalBackend, RelationalOptions, relationship_key};

    use super::*;
    use crate::node::JsonMap;

    fn map(value: Value) -> JsonMap {
        match value {
            Value::Object(m) => m,
            other => panic!("not an object: {other}"),
        }
    }

    fn memory_manager() -> ContextManager {
        ContextManager::new(Arc::new(MemoryBackend::new())).unwrap()
    }

    async fn relational_manager() -> ContextManager {
        let backend = RelationalBackend::connect(RelationalOptions::in_memory())
            .await
            .unwrap();
        ContextManager::new(Arc::new(backend)).unwrap()
    }

    #[test]
    fn test_next_entry_time_is_strictly_increasing() {
        let mut state = UpdateState::default();
        let now = Utc::now();
        let a = state.next_entry_time(now);
        let b = state.next_entry_time(now);
        let earlier = now.checked_sub_signed(TimeDelta::seconds(1)).unwrap();
        let c = state.next_entry_time(earlier);
        assert_eq!(a, now);
        assert!(b > a);
        assert!(c > b);
    }

    #[test]
    fn test_rejects_zero_history_limit() {
        let options = ManagerOptions {
            history_limit: 0,
            ..ManagerOptions::default()
        };
        let err = ContextManager::with_options(Arc::new(MemoryBackend::new()), options).unwrap_err();
        assert!(matches!(err, ContextError::InvalidOptions(_)));
    }

    #[test]
    fn test_rejects_bad_namespace() {
        let options = ManagerOptions {
            namespace: "a:b".into(),
            ..ManagerOptions::default()
        };
        assert!(ContextManager::with_options(Arc::new(MemoryBackend::new()), options).is_err());

        // Flat keys under this namespace would look like node ids.
        let options = ManagerOptions {
            namespace: "ctx_ops".into(),
            ..ManagerOptions::default()
        };
        assert!(ContextManager::with_options(Arc::new(MemoryBackend::new()), options).is_err());
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let manager = memory_manager();
        let id = manager
            .create_context(
                NewContext::new(map(json!({"task": "price"})))
                    .with_type("task")
                    .with_tags(["a"]),
            )
            .await
            .unwrap();

        let node = manager.get_context(&id).await.unwrap();
        assert_eq!(node.id, id);
        assert_eq!(node.node_type, "task");
        assert_eq!(node.version, 1);
        assert!(node.has_tag("a"));
        assert!(manager.get_context("ctx_missing").await.is_none());
    }

    #[tokio::test]
    async fn test_update_missing_node_is_false() {
        let manager = memory_manager();
        assert!(!manager.update_context("ctx_nope", ContextUpdate::new()).await);
        assert!(!manager.add_tag("ctx_nope", "x").await);
        assert!(!manager.delete_context("ctx_nope").await);
    }

    #[tokio::test]
    async fn test_tag_updates_bump_version() {
        let manager = memory_manager();
        let id = manager.create_context(NewContext::default()).await.unwrap();

        assert!(manager.add_tag(&id, "hot").await);
        assert!(manager.add_tag(&id, "hot").await);
        assert!(manager.remove_tag(&id, "hot").await);

        let node = manager.get_context(&id).await.unwrap();
        assert!(node.tags.is_empty());
        assert_eq!(node.version, 4);
    }

    #[tokio::test]
    async fn test_modify_context_sees_current_node() {
        let manager = memory_manager();
        let id = manager
            .create_context(NewContext::new(map(json!({"count": 1}))))
            .await
            .unwrap();

        assert!(
            manager
                .modify_context(&id, |node| {
                    let count = node.data["count"].as_i64().unwrap_or_default();
                    ContextUpdate::new().with_data(map(json!({"count": count.saturating_add(1)})))
                })
                .await
        );
        let node = manager.get_context(&id).await.unwrap();
        assert_eq!(node.data["count"], 2);
        assert_eq!(node.version, 2);
    }

    #[tokio::test]
    async fn test_children_and_delete_without_cascade() {
        let manager = memory_manager();
        let parent = manager.create_context(NewContext::default()).await.unwrap();
        let child = manager
            .create_context(NewContext::default().with_parent(&parent))
            .await
            .unwrap();

        let children = manager.get_children(&parent).await;
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child);
        // Parent data is untouched by linking.
        assert!(manager.get_context(&parent).await.unwrap().data.is_empty());

        assert!(manager.delete_context(&parent).await);
        assert!(manager.get_context(&child).await.is_some());
        assert!(manager.get_children(&parent).await.is_empty());
        assert!(
            !manager
                .backend()
                .exists(&relationship_key(&parent))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_deleting_child_unlinks_it() {
        let manager = memory_manager();
        let parent = manager.create_context(NewContext::default()).await.unwrap();
        let child = manager
            .create_context(NewContext::default().with_parent(&parent))
            .await
            .unwrap();

        assert!(manager.delete_context(&child).await);
        assert!(manager.get_children(&parent).await.is_empty());
        assert!(manager.backend().children(&parent).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_parent_is_not_fatal() {
        let manager = memory_manager();
        let id = manager
            .create_context(NewContext::default().with_parent("ctx_ghost"))
            .await
            .unwrap();
        let node = manager.get_context(&id).await.unwrap();
        assert_eq!(node.parent_id.as_deref(), Some("ctx_ghost"));
        assert!(manager.get_children("ctx_ghost").await.is_empty());
    }

    #[tokio::test]
    async fn test_find_by_type_scans_without_index() {
        let manager = memory_manager();
        manager
            .create_context(NewContext::default().with_type("task"))
            .await
            .unwrap();
        manager.create_context(NewContext::default()).await.unwrap();
        manager.update("agent", json!({"x": 1}), None).await.unwrap();

        let tasks = manager.find_contexts_by_type("task").await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(manager.find_contexts_by_type("generic").await.len(), 1);
    }

    #[tokio::test]
    async fn test_relational_cascade_and_indexes() {
        let manager = relational_manager().await;
        let parent = manager
            .create_context(NewContext::default().with_tags(["root"]))
            .await
            .unwrap();
        let child = manager
            .create_context(NewContext::default().with_parent(&parent).with_type("leaf"))
            .await
            .unwrap();

        assert_eq!(manager.find_contexts_by_tag("root").await.len(), 1);
        assert_eq!(manager.find_contexts_by_type("leaf").await[0].id, child);
        assert_eq!(manager.get_children(&parent).await[0].id, child);

        assert!(manager.delete_context(&parent).await);
        assert!(manager.get_context(&child).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_keeps_remaining_ttl() {
        let manager = memory_manager();
        let id = manager
            .create_context(NewContext::default().with_ttl(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(manager.add_tag(&id, "x").await);
        match manager.backend().ttl(&id).await.unwrap() {
            TtlStatus::Expires(left) => assert!(left <= Duration::from_secs(6)),
            other => panic!("expected expiry, got {other:?}"),
        }

        tokio::time::advance(Duration::from_secs(7)).await;
        assert!(manager.get_context(&id).await.is_none());
    }
}
