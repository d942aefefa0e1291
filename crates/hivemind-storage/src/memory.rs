//! In-memory backend.
//!
//! Behaves like the cache backend without a server: values expire after their
//! TTL (measured on the Tokio clock, so paused-time tests work) and deleting a
//! node leaves its children in place. Expired entries are dropped lazily on
//! the next write; there is no sweeper.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::backend::{ContextBackend, TtlStatus, validate_key};
use crate::error::{StorageError, StorageResult};
use crate::pattern::KeyPattern;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Ephemeral backend for tests and single-process use.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryBackend {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if the lock is poisoned.
    pub fn len(&self) -> StorageResult<usize> {
        let now = Instant::now();
        let data = self.read_guard()?;
        Ok(data.values().filter(|e| e.is_live(now)).count())
    }

    /// Whether the store holds no live entries.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if the lock is poisoned.
    pub fn is_empty(&self) -> StorageResult<bool> {
        self.len().map(|n| n == 0)
    }

    fn read_guard(
        &self,
    ) -> StorageResult<std::sync::RwLockReadGuard<'_, HashMap<String, MemoryEntry>>> {
        self.data
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))
    }

    fn write_guard(
        &self,
    ) -> StorageResult<std::sync::RwLockWriteGuard<'_, HashMap<String, MemoryEntry>>> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let now = Instant::now();
        data.retain(|_, entry| entry.is_live(now));
        Ok(data)
    }
}

#[async_trait]
impl ContextBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        validate_key(key)?;
        let now = Instant::now();
        let data = self.read_guard()?;
        Ok(data
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> StorageResult<bool> {
        validate_key(key)?;
        let expires_at = ttl.map(|ttl| Instant::now().checked_add(ttl).unwrap_or_else(far_future));
        let mut data = self.write_guard()?;
        data.insert(
            key.to_string(),
            MemoryEntry {
                value: value.clone(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let mut data = self.write_guard()?;
        Ok(data.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let now = Instant::now();
        let data = self.read_guard()?;
        Ok(data.get(key).is_some_and(|e| e.is_live(now)))
    }

    async fn keys(&self, pattern: &str) -> StorageResult<Vec<String>> {
        let pattern = KeyPattern::new(pattern)?;
        let now = Instant::now();
        let data = self.read_guard()?;
        let mut keys: Vec<String> = data
            .iter()
            .filter(|(k, e)| e.is_live(now) && pattern.matches(k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> StorageResult<()> {
        self.read_guard().map(|_| ())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool> {
        validate_key(key)?;
        let mut data = self.write_guard()?;
        Ok(match data.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now().checked_add(ttl).unwrap_or_else(far_future));
                true
            },
            None => false,
        })
    }

    async fn ttl(&self, key: &str) -> StorageResult<TtlStatus> {
        validate_key(key)?;
        let now = Instant::now();
        let data = self.read_guard()?;
        Ok(match data.get(key).filter(|e| e.is_live(now)) {
            None => TtlStatus::Missing,
            Some(MemoryEntry {
                expires_at: None, ..
            }) => TtlStatus::Persistent,
            Some(MemoryEntry {
                expires_at: Some(at),
                ..
            }) => TtlStatus::Expires(at.saturating_duration_since(now)),
        })
    }
}

fn far_future() -> Instant {
    // Roughly thirty years; `Instant` has no MAX.
    Instant::now()
        .checked_add(Duration::from_secs(946_080_000))
        .unwrap_or_else(Instant::now)
}
