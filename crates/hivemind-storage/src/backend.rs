//! The backend contract every store implements.
//!
//! [`ContextBackend`] is the only thing the context manager talks to. Four
//! core operations (`get`, `set`, `delete`, `exists`) plus `keys` have no
//! default bodies, so an incomplete backend does not compile. Everything else
//! is an optional capability with a key-value fallback:
//!
//! - **TTL inspection** (`expire`, `ttl`): defaults report "unsupported".
//! - **Relationships**: defaults keep a JSON index under `rel:{parent_id}`.
//! - **Indexed lookups** (`find_by_*`): defaults return `None`, telling the
//!   caller to scan `keys()` instead.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StorageError, StorageResult};

/// Key prefix of hierarchical context nodes.
pub const NODE_KEY_PREFIX: &str = "ctx_";

/// Key prefix of the key-value relationship index.
pub const RELATIONSHIP_KEY_PREFIX: &str = "rel:";

/// Relationship type used for parent/child links.
pub const CHILD_RELATIONSHIP: &str = "child";

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate that a key is safe for storage.
///
/// Keys must be non-empty and must not contain the null byte.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] if the key is empty or contains `\0`.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key must not be empty".into()));
    }
    if key.contains('\0') {
        return Err(StorageError::InvalidKey(
            "key must not contain null bytes".into(),
        ));
    }
    Ok(())
}

/// Whether `key` addresses a hierarchical context node.
#[must_use]
pub fn is_node_key(key: &str) -> bool {
    key.starts_with(NODE_KEY_PREFIX)
}

/// The key holding the relationship index for `parent_id`.
#[must_use]
pub fn relationship_key(parent_id: &str) -> String {
    format!("{RELATIONSHIP_KEY_PREFIX}{parent_id}")
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    /// The key does not exist.
    Missing,
    /// The key exists and never expires.
    Persistent,
    /// The key expires after the given duration.
    Expires(Duration),
}

/// A directed link from a parent node to a child node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// The parent node id.
    pub parent_id: String,
    /// The child node id.
    pub child_id: String,
    /// Link kind, `"child"` for hierarchy edges.
    pub relationship_type: String,
    /// When the link was recorded.
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    /// A parent/child link recorded now.
    #[must_use]
    pub fn child(parent_id: impl Into<String>, child_id: impl Into<String>) -> Self {
        Self {
            parent_id: parent_id.into(),
            child_id: child_id.into(),
            relationship_type: CHILD_RELATIONSHIP.to_string(),
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A store for JSON values addressed by string keys.
///
/// Absence is reported as `Ok(None)` / `Ok(false)`. Errors mean the backend
/// itself failed (unreachable, rejected the command, corrupt data).
#[async_trait]
pub trait ContextBackend: Send + Sync {
    /// Short backend name used in logs (`"cache"`, `"relational"`, `"memory"`).
    fn name(&self) -> &'static str;

    /// Get a value by key.
    ///
    /// Returns `None` if the key does not exist or has expired.
    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Store a value, replacing any previous one.
    ///
    /// `ttl` makes the key expire after that long; `None` keeps it until
    /// deleted. Returns `true` when the write was accepted.
    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> StorageResult<bool>;

    /// Delete a key.
    ///
    /// Returns `true` if the key existed and was deleted.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// List keys matching a glob pattern. Best-effort; order is unspecified.
    async fn keys(&self, pattern: &str) -> StorageResult<Vec<String>>;

    /// Liveness probe.
    async fn ping(&self) -> StorageResult<()> {
        self.exists("__hivemind_ping__").await.map(|_| ())
    }

    /// Whether deleting a node also deletes its descendants.
    fn cascades_deletes(&self) -> bool {
        false
    }

    /// Set or replace the expiry of an existing key.
    ///
    /// Returns `false` if the key is missing or the backend cannot expire it.
    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool> {
        let _ = (key, ttl);
        Ok(false)
    }

    /// Remaining lifetime of a key.
    async fn ttl(&self, key: &str) -> StorageResult<TtlStatus> {
        Ok(if self.exists(key).await? {
            TtlStatus::Persistent
        } else {
            TtlStatus::Missing
        })
    }

    /// Record a `parent_id -> child_id` link. Idempotent.
    ///
    /// Returns `false` when the backend refuses the link (for example a
    /// missing endpoint under referential integrity).
    async fn add_relationship(
        &self,
        parent_id: &str,
        child_id: &str,
        relationship_type: &str,
    ) -> StorageResult<bool> {
        let key = relationship_key(parent_id);
        let mut links = read_relationship_index(self, &key).await?;
        if links.iter().any(|r| r.child_id == child_id) {
            return Ok(true);
        }
        links.push(Relationship {
            relationship_type: relationship_type.to_string(),
            ..Relationship::child(parent_id, child_id)
        });
        let value = serde_json::to_value(&links)?;
        self.set(&key, &value, None).await
    }

    /// Remove one `parent_id -> child_id` link.
    async fn remove_relationship(&self, parent_id: &str, child_id: &str) -> StorageResult<bool> {
        let key = relationship_key(parent_id);
        let mut links = read_relationship_index(self, &key).await?;
        let before = links.len();
        links.retain(|r| r.child_id != child_id);
        if links.len() == before {
            return Ok(false);
        }
        if links.is_empty() {
            return self.delete(&key).await;
        }
        let value = serde_json::to_value(&links)?;
        self.set(&key, &value, None).await
    }

    /// Drop every link whose parent is `parent_id`.
    async fn clear_relationships(&self, parent_id: &str) -> StorageResult<bool> {
        self.delete(&relationship_key(parent_id)).await
    }

    /// Links whose parent is `parent_id`, oldest first.
    async fn children(&self, parent_id: &str) -> StorageResult<Vec<Relationship>> {
        read_relationship_index(self, &relationship_key(parent_id)).await
    }

    /// Node ids carrying `tag`, or `None` if the backend has no tag index.
    async fn find_by_tag(&self, tag: &str) -> StorageResult<Option<Vec<String>>> {
        let _ = tag;
        Ok(None)
    }

    /// Node ids of `node_type`, or `None` if the backend has no type index.
    async fn find_by_type(&self, node_type: &str) -> StorageResult<Option<Vec<String>>> {
        let _ = node_type;
        Ok(None)
    }

    /// Node ids declaring `parent_id` as parent, or `None` without an index.
    async fn find_by_parent(&self, parent_id: &str) -> StorageResult<Option<Vec<String>>> {
        let _ = parent_id;
        Ok(None)
    }
}

async fn read_relationship_index<B: ContextBackend + ?Sized>(
    backend: &B,
    key: &str,
) -> StorageResult<Vec<Relationship>> {
    match backend.get(key).await? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key_rejects_empty() {
        assert!(validate_key("").is_err());
    }

    #[test]
    fn test_validate_key_rejects_null_byte() {
        assert!(validate_key("k\0bad").is_err());
    }

    #[test]
    fn test_node_key_detection() {
        assert!(is_node_key("ctx_0123"));
        assert!(!is_node_key("mcp:abc"));
        assert!(!is_node_key("rel:ctx_0123"));
    }

    #[test]
    fn test_relationship_serialization() {
        let link = Relationship::child("ctx_a", "ctx_b");
        let json = serde_json::to_value(&link).unwrap();
        assert_eq!(json["parent_id"], "ctx_a");
        assert_eq!(json["child_id"], "ctx_b");
        assert_eq!(json["relationship_type"], "child");
        let back: Relationship = serde_json::from_value(json).unwrap();
        assert_eq!(back, link);
    }
}
