//! Configuration types for the Hivemind context store.
//!
//! All types here are self-contained; conversion to storage options happens
//! where the store is constructed. Every struct implements [`Default`] with
//! the same values as `defaults.toml`, so a bare `[section]` header in TOML
//! produces a working configuration.

use std::time::Duration;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration for the context store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend selection and manager behaviour.
    pub store: StoreConfig,
    /// Redis cache backend connection.
    pub cache: CacheConfig,
    /// SQLite relational backend connection and pool.
    pub relational: RelationalConfig,
    /// Log level and format.
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// The kind of backend a store is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Remote TTL cache (Redis).
    Cache,
    /// Durable relational store (SQLite).
    Relational,
    /// Process-local map; nothing survives a restart.
    Memory,
}

impl BackendKind {
    /// Every accepted backend name.
    pub const NAMES: [&'static str; 3] = ["cache", "relational", "memory"];

    /// The config name of this backend.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Relational => "relational",
            Self::Memory => "memory",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cache" | "redis" => Ok(Self::Cache),
            "relational" | "sqlite" => Ok(Self::Relational),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::ValidationError {
                field: "store.backend".to_owned(),
                message: format!(
                    "unsupported backend '{other}'; expected one of: {}",
                    Self::NAMES.join(", ")
                ),
            }),
        }
    }
}

/// Backend selection and manager behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend name: `cache`, `relational` or `memory`.
    pub backend: String,
    /// Key namespace for flat entries and agent histories.
    pub namespace: String,
    /// TTL applied to flat entries written without an explicit one.
    /// Absent means entries never expire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_ttl_secs: Option<u64>,
    /// How many context ids each agent history keeps.
    pub history_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "cache".to_owned(),
            namespace: "mcp".to_owned(),
            default_ttl_secs: None,
            history_limit: 100,
        }
    }
}

impl StoreConfig {
    /// The selected backend.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for an unknown backend name.
    pub fn backend_kind(&self) -> ConfigResult<BackendKind> {
        self.backend.parse()
    }

    /// The default flat-entry TTL, if any.
    #[must_use]
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Redis connection settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// `redis://` or `rediss://` URL. May embed credentials.
    pub url: String,
    /// Timeout for establishing the connection.
    pub connect_timeout_ms: u64,
    /// Timeout for each command response.
    pub response_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_owned(),
            connect_timeout_ms: 5000,
            response_timeout_ms: 5000,
        }
    }
}

impl CacheConfig {
    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Response timeout as a [`Duration`].
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl std::fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("url", &redact_url(&self.url))
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("response_timeout_ms", &self.response_timeout_ms)
            .finish()
    }
}

impl Serialize for CacheConfig {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("CacheConfig", 3)?;
        state.serialize_field("url", &redact_url(&self.url))?;
        state.serialize_field("connect_timeout_ms", &self.connect_timeout_ms)?;
        state.serialize_field("response_timeout_ms", &self.response_timeout_ms)?;
        state.end()
    }
}

// ---------------------------------------------------------------------------
// Relational
// ---------------------------------------------------------------------------

/// SQLite connection, pool and connect-retry settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct RelationalConfig {
    /// `sqlite://<path>`, `sqlite::memory:` or a bare path.
    pub url: String,
    /// Connections opened eagerly.
    pub pool_min: usize,
    /// Upper bound on open connections.
    pub pool_max: usize,
    /// Retries after the first failed connect.
    pub connect_retries: u32,
    /// Delay before the first retry; doubles on each retry.
    pub initial_backoff_ms: u64,
    /// Ceiling for the retry delay.
    pub max_backoff_ms: u64,
    /// How long a statement waits on a locked database.
    pub busy_timeout_ms: u64,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://hivemind.db".to_owned(),
            pool_min: 1,
            pool_max: 10,
            connect_retries: 2,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            busy_timeout_ms: 5000,
        }
    }
}

impl RelationalConfig {
    /// Initial retry delay as a [`Duration`].
    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Retry delay ceiling as a [`Duration`].
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Busy timeout as a [`Duration`].
    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl std::fmt::Debug for RelationalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalConfig")
            .field("url", &redact_url(&self.url))
            .field("pool_min", &self.pool_min)
            .field("pool_max", &self.pool_max)
            .field("connect_retries", &self.connect_retries)
            .field("initial_backoff_ms", &self.initial_backoff_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("busy_timeout_ms", &self.busy_timeout_ms)
            .finish()
    }
}

impl Serialize for RelationalConfig {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RelationalConfig", 7)?;
        state.serialize_field("url", &redact_url(&self.url))?;
        state.serialize_field("pool_min", &self.pool_min)?;
        state.serialize_field("pool_max", &self.pool_max)?;
        state.serialize_field("connect_retries", &self.connect_retries)?;
        state.serialize_field("initial_backoff_ms", &self.initial_backoff_ms)?;
        state.serialize_field("max_backoff_ms", &self.max_backoff_ms)?;
        state.serialize_field("busy_timeout_ms", &self.busy_timeout_ms)?;
        state.end()
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Log level and output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level: `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,
    /// `pretty`, `compact`, `json` or `full`.
    pub format: String,
    /// Extra filter directives such as `hivemind_storage=debug`.
    pub directives: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}

/// Replace the password embedded in a URL with `***`.
///
/// Strings that do not parse as URLs are returned unchanged.
#[must_use]
pub fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            if parsed.set_password(Some("***")).is_err() {
                return "<redacted>".to_owned();
            }
            parsed.to_string()
        },
        _ => raw.to_owned(),
    }
}
