//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::{BackendKind, Config};

/// Prefix reserved for context node ids; a namespace may not start with it.
pub const RESERVED_NAMESPACE_PREFIX: &str = "ctx_";

/// Largest accepted per-agent history length.
pub const MAX_HISTORY_LIMIT: usize = 10_000;

/// Validate a fully merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_store(config)?;
    validate_cache(config)?;
    validate_relational(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_store(config: &Config) -> ConfigResult<()> {
    let s = &config.store;
    s.backend_kind()?;

    if s.namespace.is_empty() || s.namespace.contains([':', '*', '?', '[', ']']) {
        return Err(invalid(
            "store.namespace",
            "namespace must be non-empty and must not contain ':' or glob characters",
        ));
    }

    if s.namespace.starts_with(RESERVED_NAMESPACE_PREFIX) {
        return Err(invalid(
            "store.namespace",
            format!("namespace must not start with '{RESERVED_NAMESPACE_PREFIX}'"),
        ));
    }

    if s.default_ttl_secs == Some(0) {
        return Err(invalid(
            "store.default_ttl_secs",
            "default TTL must be greater than zero; omit it to disable expiry",
        ));
    }

    if s.history_limit == 0 || s.history_limit > MAX_HISTORY_LIMIT {
        return Err(invalid(
            "store.history_limit",
            format!("history_limit must be between 1 and {MAX_HISTORY_LIMIT}"),
        ));
    }

    Ok(())
}

fn validate_cache(config: &Config) -> ConfigResult<()> {
    let c = &config.cache;
    // Only the selected backend's URL has to be usable.
    if config.store.backend_kind()? == BackendKind::Cache {
        let parsed = url::Url::parse(&c.url)
            .map_err(|e| invalid("cache.url", format!("invalid URL: {e}")))?;
        if !matches!(parsed.scheme(), "redis" | "rediss") {
            return Err(invalid(
                "cache.url",
                format!("unsupported scheme '{}'; expected redis or rediss", parsed.scheme()),
            ));
        }
    }

    if c.connect_timeout_ms == 0 || c.response_timeout_ms == 0 {
        return Err(invalid("cache", "timeouts must be greater than zero"));
    }
    Ok(())
}

fn validate_relational(config: &Config) -> ConfigResult<()> {
    let r = &config.relational;
    if config.store.backend_kind()? == BackendKind::Relational {
        let url = r.url.trim();
        if url.is_empty() {
            return Err(invalid("relational.url", "database URL is empty"));
        }
        if let Some((scheme, _)) = url.split_once("://")
            && scheme != "sqlite"
        {
            return Err(invalid(
                "relational.url",
                format!("unsupported scheme '{scheme}'; expected sqlite"),
            ));
        }
    }

    if r.pool_max == 0 {
        return Err(invalid("relational.pool_max", "pool_max must be at least 1"));
    }
    if r.pool_min > r.pool_max {
        return Err(invalid(
            "relational.pool_min",
            format!(
                "pool_min ({}) must not exceed pool_max ({})",
                r.pool_min, r.pool_max
            ),
        ));
    }
    if r.initial_backoff_ms > r.max_backoff_ms {
        return Err(invalid(
            "relational.initial_backoff_ms",
            "initial_backoff_ms must not exceed max_backoff_ms",
        ));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;
    if !matches!(
        l.level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error" | "off"
    ) {
        return Err(invalid(
            "logging.level",
            format!(
                "unknown level '{}'; expected trace, debug, info, warn, error or off",
                l.level
            ),
        ));
    }
    if !matches!(
        l.format.to_ascii_lowercase().as_str(),
        "pretty" | "compact" | "json" | "full"
    ) {
        return Err(invalid(
            "logging.format",
            format!("unknown format '{}'", l.format),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(err: ConfigError) -> String {
        match err {
            ConfigError::ValidationError { field, .. } => field,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let mut config = Config::default();
        config.store.backend = "postgres".to_owned();
        assert_eq!(field_of(validate(&config).unwrap_err()), "store.backend");
    }

    #[test]
    fn test_rejects_node_prefixed_namespace() {
        let mut config = Config::default();
        config.store.namespace = "ctx_ops".to_owned();
        assert_eq!(field_of(validate(&config).unwrap_err()), "store.namespace");
        config.store.namespace = "ops_ctx".to_owned();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_rejects_zero_ttl_and_history_bounds() {
        let mut config = Config::default();
        config.store.default_ttl_secs = Some(0);
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "store.default_ttl_secs"
        );

        let mut config = Config::default();
        config.store.history_limit = 0;
        assert_eq!(field_of(validate(&config).unwrap_err()), "store.history_limit");
        config.store.history_limit = 10_001;
        assert!(validate(&config).is_err());
        config.store.history_limit = MAX_HISTORY_LIMIT;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_rejects_bad_cache_scheme() {
        let mut config = Config::default();
        config.cache.url = "http://localhost:6379".to_owned();
        assert_eq!(field_of(validate(&config).unwrap_err()), "cache.url");
    }

    #[test]
    fn test_cache_url_ignored_for_other_backends() {
        let mut config = Config::default();
        config.store.backend = "memory".to_owned();
        config.cache.url = "not a url".to_owned();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_rejects_bad_relational_settings() {
        let mut config = Config::default();
        config.store.backend = "relational".to_owned();
        config.relational.url = "postgresql://db/mcp".to_owned();
        assert_eq!(field_of(validate(&config).unwrap_err()), "relational.url");

        let mut config = Config::default();
        config.relational.pool_min = 5;
        config.relational.pool_max = 2;
        assert_eq!(field_of(validate(&config).unwrap_err()), "relational.pool_min");

        config.relational.pool_min = 0;
        config.relational.pool_max = 0;
        assert_eq!(field_of(validate(&config).unwrap_err()), "relational.pool_max");
    }

    #[test]
    fn test_rejects_bad_logging() {
        let mut config = Config::default();
        config.logging.level = "loud".to_owned();
        assert_eq!(field_of(validate(&config).unwrap_err()), "logging.level");

        let mut config = Config::default();
        config.logging.format = "xml".to_owned();
        assert_eq!(field_of(validate(&config).unwrap_err()), "logging.format");
    }
}
