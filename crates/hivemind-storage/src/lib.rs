//! Hivemind Storage: pluggable persistence for the context store.
//!
//! Every backend implements [`ContextBackend`], a JSON key-value contract
//! with optional capabilities (TTL inspection, relationships, indexed
//! lookups). The context manager only ever sees `Arc<dyn ContextBackend>`.
//!
//! # Backends
//!
//! | Backend | Durability | TTL | Delete cascades | Indexes |
//! |---------|------------|-----|-----------------|---------|
//! | [`CacheBackend`] (Redis) | server | native | no | none |
//! | [`RelationalBackend`] (SQLite) | file | entries only | yes | tag, type, parent |
//! | [`MemoryBackend`] | process | Tokio clock | no | none |
//!
//! One backend is chosen at construction; switching is a config change.
//!
//! # Feature Flags
//!
//! - **`cache`** - Redis cache backend (default)
//! - **`relational`** - SQLite relational backend (default)

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod backend;
pub mod error;
pub mod memory;
pub mod pattern;
pub mod retry;
pub mod scoped;

#[cfg(feature = "cache")]
pub mod cache;

#[cfg(feature = "relational")]
pub mod relational;

pub use backend::{
    CHILD_RELATIONSHIP, ContextBackend, NODE_KEY_PREFIX, Relationship, TtlStatus, is_node_key,
    relationship_key, validate_key,
};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use pattern::KeyPattern;
pub use retry::{RetryConfig, RetryOutcome};
pub use scoped::ScopedBackend;

#[cfg(feature = "cache")]
pub use cache::{CacheBackend, CacheOptions, redact_url};

#[cfg(feature = "relational")]
pub use relational::{DbLocation, RelationalBackend, RelationalOptions};
