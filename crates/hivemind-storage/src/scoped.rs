//! Namespace-bound view over a backend.
//!
//! [`ScopedBackend`] prefixes every key with `"{namespace}:"` so callers work
//! with short local keys, and adds typed JSON helpers on top of the raw
//! [`ContextBackend`] calls.
//!
//! ```rust,ignore
//! use hivemind_storage::{MemoryBackend, ScopedBackend};
//! use std::sync::Arc;
//!
//! let scoped = ScopedBackend::new(Arc::new(MemoryBackend::new()), "mcp")?;
//! scoped.set_json("agent:a1:history", &vec!["id1"], None).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::backend::{ContextBackend, NODE_KEY_PREFIX, validate_key};
use crate::error::{StorageError, StorageResult};

/// A backend view confined to one namespace.
#[derive(Clone)]
pub struct ScopedBackend {
    inner: Arc<dyn ContextBackend>,
    namespace: String,
}

impl std::fmt::Debug for ScopedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedBackend")
            .field("namespace", &self.namespace)
            .field("backend", &self.inner.name())
            .finish_non_exhaustive()
    }
}

impl ScopedBackend {
    /// Create a scoped view into `backend` for `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if the namespace is empty or
    /// contains `:` or glob metacharacters, or if it starts with the node key
    /// prefix (its keys would be taken for node ids).
    pub fn new(backend: Arc<dyn ContextBackend>, namespace: impl Into<String>) -> StorageResult<Self> {
        let namespace = namespace.into();
        validate_key(&namespace)?;
        if namespace.contains([':', '*', '?', '[', ']']) {
            return Err(StorageError::InvalidKey(format!(
                "namespace must not contain ':' or glob characters: {namespace}"
            )));
        }
        if namespace.starts_with(NODE_KEY_PREFIX) {
            return Err(StorageError::InvalidKey(format!(
                "namespace must not start with '{NODE_KEY_PREFIX}': {namespace}"
            )));
        }
        Ok(Self {
            inner: backend,
            namespace,
        })
    }

    /// The namespace this view is scoped to.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The underlying backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn ContextBackend> {
        &self.inner
    }

    /// The full backend key for a local key.
    #[must_use]
    pub fn full_key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    /// Get a raw value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the backend fails.
    pub async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        validate_key(key)?;
        self.inner.get(&self.full_key(key)).await
    }

    /// Set a raw value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the backend fails.
    pub async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> StorageResult<bool> {
        validate_key(key)?;
        self.inner.set(&self.full_key(key), value, ttl).await
    }

    /// Delete a key. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the backend fails.
    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        self.inner.delete(&self.full_key(key)).await
    }

    /// Check if a key exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the backend fails.
    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        self.inner.exists(&self.full_key(key)).await
    }

    /// Local keys matching `pattern` within the namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is invalid or the backend fails.
    pub async fn keys(&self, pattern: &str) -> StorageResult<Vec<String>> {
        let prefix = format!("{}:", self.namespace);
        let keys = self.inner.keys(&format!("{prefix}{pattern}")).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(String::from))
            .collect())
    }

    /// Delete every key in the namespace. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn clear(&self) -> StorageResult<u64> {
        let mut removed: u64 = 0;
        for key in self.keys("*").await? {
            if self.delete(&key).await? {
                removed = removed.saturating_add(1);
            }
        }
        Ok(removed)
    }

    // -- Typed convenience (JSON) --

    /// Deserialize a stored value.
    ///
    /// Returns `None` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if the value has the wrong shape.
    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> StorageResult<Option<T>> {
        self.get(key)
            .await?
            .map(|v| serde_json::from_value(v).map_err(StorageError::from))
            .transpose()
    }

    /// Serialize and store a value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if serialization fails.
    pub async fn set_json<T: serde::Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> StorageResult<bool> {
        let value = serde_json::to_value(value)?;
        self.set(key, &value, ttl).await
    }
}
