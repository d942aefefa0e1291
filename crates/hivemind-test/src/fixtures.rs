//! Managers and payloads for tests.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use hivemind_context::{ContextManager, JsonMap, ManagerOptions};
use hivemind_storage::{
    ContextBackend, DbLocation, MemoryBackend, RelationalBackend, RelationalOptions, RetryConfig,
};

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A small node payload.
#[must_use]
pub fn sample_data() -> JsonMap {
    let mut data = JsonMap::new();
    data.insert("task".into(), json!("price the vault"));
    data.insert("priority".into(), json!(2));
    data.insert("inputs".into(), json!({"asset": "ETH", "window": "1h"}));
    data
}

/// Build a payload from a JSON object literal.
///
/// # Panics
///
/// Panics if `value` is not an object.
#[must_use]
pub fn object(value: serde_json::Value) -> JsonMap {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Wrap `backend` in a manager with default options.
///
/// # Panics
///
/// Panics if the manager cannot be built.
#[must_use]
pub fn manager_on(backend: Arc<dyn ContextBackend>) -> ContextManager {
    ContextManager::new(backend).expect("default manager options are valid")
}

/// Wrap `backend` in a manager with `options`.
///
/// # Panics
///
/// Panics if the options are rejected.
#[must_use]
pub fn manager_with(backend: Arc<dyn ContextBackend>, options: ManagerOptions) -> ContextManager {
    ContextManager::with_options(backend, options).expect("manager options are valid")
}

/// A manager over a fresh [`MemoryBackend`].
#[must_use]
pub fn memory_manager() -> ContextManager {
    manager_on(Arc::new(MemoryBackend::new()))
}

/// A relational database file in its own temporary directory.
///
/// The directory is removed when this is dropped, so keep it alive for as
/// long as the backend is in use.
#[derive(Debug)]
pub struct TestDatabase {
    /// Directory holding the database file.
    pub dir: TempDir,
    /// The opened backend.
    pub backend: Arc<RelationalBackend>,
}

impl TestDatabase {
    /// Create and migrate a database file.
    ///
    /// # Panics
    ///
    /// Panics if the directory or the database cannot be created.
    pub async fn open() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let options = RelationalOptions {
            retry: RetryConfig::no_retry(),
            ..RelationalOptions::new(DbLocation::File(dir.path().join("hivemind.db")))
        };
        let backend = RelationalBackend::connect(options)
            .await
            .expect("open test database");
        Self {
            dir,
            backend: Arc::new(backend),
        }
    }

    /// A manager over this database.
    #[must_use]
    pub fn manager(&self) -> ContextManager {
        manager_on(Arc::clone(&self.backend) as Arc<dyn ContextBackend>)
    }
}

/// A manager over a private in-memory relational database.
///
/// # Panics
///
/// Panics if the database cannot be opened.
pub async fn relational_manager() -> ContextManager {
    let backend = RelationalBackend::connect(RelationalOptions::in_memory())
        .await
        .expect("open in-memory database");
    manager_on(Arc::new(backend))
}
