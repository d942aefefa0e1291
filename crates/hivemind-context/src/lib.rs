//! Hivemind Context: the shared context store agents read and write.
//!
//! [`ContextManager`] offers two views over one backend:
//!
//! - **Hierarchical**: [`ContextNode`]s with a parent link, tags, metadata,
//!   and a version that grows by one on every update.
//! - **Flat**: [`ContextEntry`]s written by an agent, content-addressed by
//!   SHA-256, with a bounded most-recent-first history per agent.
//!
//! The manager only sees `Arc<dyn ContextBackend>`; which backend it gets is
//! a configuration choice made in [`connect_backend`].
//!
//! ```rust,ignore
//! let manager = ContextManager::from_config(&config).await?;
//! let id = manager
//!     .create_context(NewContext::new(data).with_type("task").with_tags(["pricing"]))
//!     .await;
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod connect;
pub mod entry;
pub mod error;
mod flat;
pub mod manager;
pub mod node;

pub use connect::connect_backend;
pub use entry::{ContextEntry, ENTRY_FORMAT_VERSION, EntryMetadata, entry_id};
pub use error::{ContextError, ContextResult};
pub use manager::{ContextManager, DEFAULT_HISTORY_LIMIT, DEFAULT_NAMESPACE, ManagerOptions};
pub use node::{ContextNode, ContextUpdate, DEFAULT_NODE_TYPE, JsonMap, NewContext, generate_node_id};
