//! Shared harness: one manager per available backend.

use std::sync::Arc;

use hivemind_context::{ContextManager, ManagerOptions};
use hivemind_storage::{CacheBackend, CacheOptions, ContextBackend, MemoryBackend};
use hivemind_test::{TestDatabase, init_test_logging, manager_on, manager_with};

/// Environment variable naming a Redis database the tests may write to.
#[allow(dead_code)]
pub const REDIS_URL_VAR: &str = "HIVEMIND_TEST_REDIS_URL";

/// A manager plus whatever keeps its backend alive.
#[allow(dead_code)]
pub struct Store {
    /// Backend name, for assertion messages.
    pub name: &'static str,
    /// The manager under test.
    pub manager: ContextManager,
    _db: Option<TestDatabase>,
}

/// A tag, type or agent id no earlier run can have used.
#[allow(dead_code)]
pub fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

/// A live cache backend, when the environment provides one.
#[allow(dead_code)]
pub async fn redis_backend() -> Option<Arc<dyn ContextBackend>> {
    let url = std::env::var(REDIS_URL_VAR).ok().filter(|u| !u.is_empty())?;
    let backend = CacheBackend::connect(CacheOptions::new(url))
        .await
        .expect("HIVEMIND_TEST_REDIS_URL is set but Redis is unreachable");
    Some(Arc::new(backend))
}

/// Memory, file-backed relational, and Redis when available.
///
/// Each store gets a fresh flat-mode namespace.
#[allow(dead_code)]
pub async fn stores() -> Vec<Store> {
    stores_with(ManagerOptions::default()).await
}

/// Like [`stores`], with explicit manager options.
#[allow(dead_code)]
pub async fn stores_with(options: ManagerOptions) -> Vec<Store> {
    init_test_logging();
    let scoped = |options: &ManagerOptions| ManagerOptions {
        namespace: unique("it").replace('-', "_"),
        ..options.clone()
    };

    let db = TestDatabase::open().await;
    let mut stores = vec![
        Store {
            name: "memory",
            manager: manager_with(Arc::new(MemoryBackend::new()), scoped(&options)),
            _db: None,
        },
        Store {
            name: "relational",
            manager: manager_with(
                Arc::clone(&db.backend) as Arc<dyn ContextBackend>,
                scoped(&options),
            ),
            _db: Some(db),
        },
    ];
    if let Some(backend) = redis_backend().await {
        stores.push(Store {
            name: "cache",
            manager: manager_with(backend, scoped(&options)),
            _db: None,
        });
    }
    stores
}

/// A memory-backed manager.
#[allow(dead_code)]
pub fn memory() -> ContextManager {
    manager_on(Arc::new(MemoryBackend::new()))
}
