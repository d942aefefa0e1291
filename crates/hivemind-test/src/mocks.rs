//! Mock backends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use hivemind_storage::{
    ContextBackend, MemoryBackend, Relationship, StorageError, StorageResult, TtlStatus,
};

/// A backend where every call fails as if the server were unreachable.
#[derive(Debug, Clone)]
pub struct FailingBackend {
    message: String,
}

impl Default for FailingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FailingBackend {
    /// Fail with a generic connection error.
    #[must_use]
    pub fn new() -> Self {
        Self::with_message("connection refused")
    }

    /// Fail with `message`.
    #[must_use]
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    fn fail<T>(&self) -> StorageResult<T> {
        Err(StorageError::Connection(self.message.clone()))
    }
}

#[async_trait]
impl ContextBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn get(&self, _key: &str) -> StorageResult<Option<Value>> {
        self.fail()
    }

    async fn set(&self, _key: &str, _value: &Value, _ttl: Option<Duration>) -> StorageResult<bool> {
        self.fail()
    }

    async fn delete(&self, _key: &str) -> StorageResult<bool> {
        self.fail()
    }

    async fn exists(&self, _key: &str) -> StorageResult<bool> {
        self.fail()
    }

    async fn keys(&self, _pattern: &str) -> StorageResult<Vec<String>> {
        self.fail()
    }

    async fn ttl(&self, _key: &str) -> StorageResult<TtlStatus> {
        self.fail()
    }

    async fn children(&self, _parent_id: &str) -> StorageResult<Vec<Relationship>> {
        self.fail()
    }
}

/// Forwards to an inner backend and counts calls per operation.
///
/// Uses `std::sync::Mutex` so counts can be read without a runtime.
pub struct CountingBackend {
    inner: Arc<dyn ContextBackend>,
    calls: Mutex<HashMap<&'static str, u64>>,
}

impl std::fmt::Debug for CountingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountingBackend")
            .field("inner", &self.inner.name())
            .field("calls", &self.snapshot())
            .finish()
    }
}

impl Default for CountingBackend {
    fn default() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }
}

impl CountingBackend {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn ContextBackend>) -> Self {
        Self {
            inner,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// How many times `operation` (a trait method name) was called.
    #[must_use]
    pub fn calls(&self, operation: &str) -> u64 {
        self.calls
            .lock()
            .map(|c| c.get(operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Total calls across all operations.
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.snapshot().values().fold(0, |acc, n| acc.saturating_add(*n))
    }

    /// Forget all recorded calls.
    pub fn reset(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    fn snapshot(&self) -> HashMap<&'static str, u64> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, operation: &'static str) {
        if let Ok(mut calls) = self.calls.lock() {
            let count = calls.entry(operation).or_insert(0);
            *count = count.saturating_add(1);
        }
    }
}

#[async_trait]
impl ContextBackend for CountingBackend {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.record("get");
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> StorageResult<bool> {
        self.record("set");
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.record("delete");
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.record("exists");
        self.inner.exists(key).await
    }

    async fn keys(&self, pattern: &str) -> StorageResult<Vec<String>> {
        self.record("keys");
        self.inner.keys(pattern).await
    }

    async fn ping(&self) -> StorageResult<()> {
        self.record("ping");
        self.inner.ping().await
    }

    fn cascades_deletes(&self) -> bool {
        self.inner.cascades_deletes()
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool> {
        self.record("expire");
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> StorageResult<TtlStatus> {
        self.record("ttl");
        self.inner.ttl(key).await
    }

    async fn add_relationship(
        &self,
        parent_id: &str,
        child_id: &str,
        relationship_type: &str,
    ) -> StorageResult<bool> {
        self.record("add_relationship");
        self.inner
            .add_relationship(parent_id, child_id, relationship_type)
            .await
    }

    async fn remove_relationship(&self, parent_id: &str, child_id: &str) -> StorageResult<bool> {
        self.record("remove_relationship");
        self.inner.remove_relationship(parent_id, child_id).await
    }

    async fn clear_relationships(&self, parent_id: &str) -> StorageResult<bool> {
        self.record("clear_relationships");
        self.inner.clear_relationships(parent_id).await
    }

    async fn children(&self, parent_id: &str) -> StorageResult<Vec<Relationship>> {
        self.record("children");
        self.inner.children(parent_id).await
    }

    async fn find_by_tag(&self, tag: &str) -> StorageResult<Option<Vec<String>>> {
        self.record("find_by_tag");
        self.inner.find_by_tag(tag).await
    }

    async fn find_by_type(&self, node_type: &str) -> StorageResult<Option<Vec<String>>> {
        self.record("find_by_type");
        self.inner.find_by_type(node_type).await
    }

    async fn find_by_parent(&self, parent_id: &str) -> StorageResult<Option<Vec<String>>> {
        self.record("find_by_parent");
        self.inner.find_by_parent(parent_id).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use hivemind_context::NewContext;

    use super::*;
    use crate::fixtures::{manager_on, sample_data};

    #[tokio::test]
    async fn test_failing_backend_degrades_to_empty_results() {
        let manager = manager_on(Arc::new(FailingBackend::new()));

        assert!(
            manager
                .create_context(NewContext::new(sample_data()))
                .await
                .is_none()
        );
        assert!(manager.get_context("ctx_missing").await.is_none());
        assert!(!manager.delete_context("ctx_missing").await);
        assert!(manager.find_contexts_by_tag("t").await.is_empty());
        assert!(manager.get_children("ctx_missing").await.is_empty());
        assert!(manager.update("agent", json!(1), None).await.is_none());
        assert!(manager.search(None, 10).await.is_empty());
        assert!(!manager.clear(None).await);
    }

    #[tokio::test]
    async fn test_counting_backend_forwards() {
        let counting = Arc::new(CountingBackend::default());
        let manager = manager_on(Arc::clone(&counting) as Arc<dyn ContextBackend>);

        let id = manager
            .create_context(NewContext::new(sample_data()))
            .await
            .unwrap();
        assert!(counting.calls("set") >= 1);

        counting.reset();
        assert!(manager.get_context(&id).await.is_some());
        assert_eq!(counting.calls("get"), 1);
        assert_eq!(counting.calls("set"), 0);
        assert_eq!(counting.total_calls(), 1);
    }
}
