//! Building a backend and manager from [`Config`].

use std::sync::Arc;

use tracing::info;

use hivemind_config::{BackendKind, Config};
use hivemind_storage::{
    CacheBackend, CacheOptions, ContextBackend, DbLocation, MemoryBackend, RelationalBackend,
    RelationalOptions, RetryConfig,
};

use crate::error::ContextResult;
use crate::manager::{ContextManager, ManagerOptions};

/// Open the backend `config` selects.
///
/// The cache backend is dialed and pinged once; the relational backend
/// retries with backoff, migrates its schema, and fails only after the
/// configured retries are spent.
///
/// # Errors
///
/// Returns an error if the backend name is unknown or the backend cannot
/// be reached.
pub async fn connect_backend(config: &Config) -> ContextResult<Arc<dyn ContextBackend>> {
    let kind = config.store.backend_kind()?;
    let backend: Arc<dyn ContextBackend> = match kind {
        BackendKind::Cache => {
            let options = CacheOptions {
                url: config.cache.url.clone(),
                connect_timeout: config.cache.connect_timeout(),
                response_timeout: config.cache.response_timeout(),
            };
            Arc::new(CacheBackend::connect(options).await?)
        },
        BackendKind::Relational => {
            let r = &config.relational;
            let options = RelationalOptions {
                location: DbLocation::parse(&r.url)?,
                pool_min: r.pool_min,
                pool_max: r.pool_max,
                busy_timeout: r.busy_timeout(),
                retry: RetryConfig::new(r.connect_retries, r.initial_backoff(), r.max_backoff()),
            };
            Arc::new(RelationalBackend::connect(options).await?)
        },
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
    };
    info!(backend = backend.name(), "Context backend ready");
    Ok(backend)
}

impl ContextManager {
    /// Connect the configured backend and build a manager on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached or the store
    /// settings are invalid.
    pub async fn from_config(config: &Config) -> ContextResult<Self> {
        let backend = connect_backend(config).await?;
        Self::with_options(backend, ManagerOptions::from(&config.store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_from_config() {
        let mut config = Config::default();
        config.store.backend = "memory".into();
        config.store.namespace = "ops".into();
        config.store.history_limit = 5;

        let manager = ContextManager::from_config(&config).await.unwrap();
        assert_eq!(manager.backend().name(), "memory");
        assert_eq!(manager.options().namespace, "ops");
        assert_eq!(manager.options().history_limit, 5);
    }

    #[tokio::test]
    async fn test_relational_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store.backend = "relational".into();
        config.relational.url = format!("sqlite://{}", dir.path().join("ctx.db").display());

        let manager = ContextManager::from_config(&config).await.unwrap();
        assert_eq!(manager.backend().name(), "relational");
        assert!(manager.backend().cascades_deletes());
        assert!(dir.path().join("ctx.db").exists());
    }

    #[tokio::test]
    async fn test_unknown_backend_fails() {
        let mut config = Config::default();
        config.store.backend = "etcd".into();
        assert!(connect_backend(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_foreign_database_scheme_fails() {
        let mut config = Config::default();
        config.store.backend = "relational".into();
        config.relational.url = "postgresql://db/mcp".into();
        assert!(ContextManager::from_config(&config).await.is_err());
    }
}
