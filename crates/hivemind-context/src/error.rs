//! Errors that escape the context manager.
//!
//! Steady-state operations never return these; backend failures are logged
//! and turned into `None`, `false` or an empty list. Only building a manager
//! can fail.

use hivemind_config::ConfigError;
use hivemind_storage::StorageError;
use thiserror::Error;

/// Errors from constructing a [`ContextManager`](crate::ContextManager).
#[derive(Debug, Error)]
pub enum ContextError {
    /// The backend could not be reached or initialized.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The configuration could not be used.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Manager options are out of range.
    #[error("invalid manager options: {0}")]
    InvalidOptions(String),
}

/// Result type for context manager construction.
pub type ContextResult<T> = Result<T, ContextError>;
