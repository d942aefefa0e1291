//! Redis-backed cache backend.
//!
//! One multiplexed connection is shared by every caller. It is opened lazily
//! on first use and verified with `PING`. When a command fails because the
//! connection is gone, the connection is dropped and the command is retried
//! once on a fresh one.
//!
//! # Reconnect
//!
//! Reconnecting is single-flight. The connection slot sits behind an async
//! mutex together with a generation counter that is bumped whenever a connect
//! attempt completes. A caller notes the generation before queueing for the
//! lock; if it changed by the time the caller gets in, somebody else finished
//! an attempt meanwhile and the caller takes that attempt's result (the new
//! connection or its error) instead of dialing again. A failed command only
//! clears the slot when the failing connection is still the current one.
//!
//! Values are JSON. A value that fails to decode is logged and reported as a
//! miss. Expiry is owned by Redis (`SET ... PX`); nothing is swept here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Cmd, FromRedisValue, RedisError};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{ContextBackend, TtlStatus, validate_key};
use crate::error::{StorageError, StorageResult};

/// Keys fetched per `SCAN` round trip.
const SCAN_COUNT: u32 = 100;

/// Connection settings for [`CacheBackend`].
#[derive(Clone)]
pub struct CacheOptions {
    /// `redis://` or `rediss://` URL, credentials included.
    pub url: String,
    /// Limit on establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Limit on a single command round trip.
    pub response_timeout: Duration,
}

impl CacheOptions {
    /// Options for `url` with default timeouts (5s connect, 5s response).
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
        }
    }
}

impl std::fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOptions")
            .field("url", &redact_url(&self.url))
            .field("connect_timeout", &self.connect_timeout)
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}

/// Hide the password component of a connection URL.
#[must_use]
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => format!("{scheme}://***@{host}"),
    }
}

struct ConnState {
    conn: Option<MultiplexedConnection>,
    generation: u64,
    last_error: Option<String>,
}

/// Shared TTL-capable cache on Redis.
pub struct CacheBackend {
    client: Client,
    options: CacheOptions,
    state: Mutex<ConnState>,
    generation: AtomicU64,
}

impl std::fmt::Debug for CacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBackend")
            .field("options", &self.options)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CacheBackend {
    /// Create a backend for the given options. Does not connect.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if the URL cannot be parsed.
    pub fn new(options: CacheOptions) -> StorageResult<Self> {
        let client = Client::open(options.url.as_str())
            .map_err(|e| StorageError::Connection(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            options,
            state: Mutex::new(ConnState {
                conn: None,
                generation: 0,
                last_error: None,
            }),
            generation: AtomicU64::new(0),
        })
    }

    /// Create a backend and establish the first connection.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if the server is unreachable.
    pub async fn connect(options: CacheOptions) -> StorageResult<Self> {
        let backend = Self::new(options)?;
        backend.connection().await?;
        Ok(backend)
    }

    /// Drop the current connection. The next call reconnects.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.conn.take().is_some() {
            info!(url = %redact_url(&self.options.url), "Closed cache connection");
        }
    }

    /// Number of connect attempts completed so far.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    async fn connection(&self) -> StorageResult<(MultiplexedConnection, u64)> {
        let observed = self.generation.load(Ordering::Acquire);
        let mut state = self.state.lock().await;

        if let Some(conn) = &state.conn {
            return Ok((conn.clone(), state.generation));
        }
        if state.generation != observed
            && let Some(err) = &state.last_error
        {
            return Err(StorageError::Connection(err.clone()));
        }

        let result = self.dial().await;
        let generation = state.generation.wrapping_add(1);
        state.generation = generation;
        let outcome = match result {
            Ok(conn) => {
                info!(
                    url = %redact_url(&self.options.url),
                    generation,
                    "Connected to cache"
                );
                state.conn = Some(conn.clone());
                state.last_error = None;
                Ok((conn, generation))
            },
            Err(e) => {
                let message = e.to_string();
                warn!(
                    url = %redact_url(&self.options.url),
                    generation,
                    error = %message,
                    "Cache connection failed"
                );
                state.last_error = Some(message.clone());
                Err(StorageError::Connection(message))
            },
        };
        self.generation.store(generation, Ordering::Release);
        outcome
    }

    async fn dial(&self) -> Result<MultiplexedConnection, RedisError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection_with_timeouts(
                self.options.response_timeout,
                self.options.connect_timeout,
            )
            .await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(reply = %pong, "Cache liveness probe");
        Ok(conn)
    }

    async fn invalidate(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation == generation && state.conn.take().is_some() {
            debug!(generation, "Dropped broken cache connection");
        }
    }

    async fn query<T: FromRedisValue + Send>(&self, cmd: &Cmd) -> StorageResult<T> {
        let mut retried = false;
        loop {
            let (mut conn, generation) = self.connection().await?;
            let result: Result<T, RedisError> = cmd.query_async(&mut conn).await;
            match result {
                Ok(value) => return Ok(value),
                Err(e) if is_connection_error(&e) => {
                    self.invalidate(generation).await;
                    if retried {
                        return Err(StorageError::Connection(e.to_string()));
                    }
                    warn!(error = %e, "Cache connection lost, reconnecting");
                    retried = true;
                },
                Err(e) => return Err(StorageError::Query(e.to_string())),
            }
        }
    }
}

fn is_connection_error(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_timeout()
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl ContextBackend for CacheBackend {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        validate_key(key)?;
        let raw: Option<Vec<u8>> = self.query(redis::cmd("GET").arg(key)).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_slice(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "Undecodable cache value treated as miss");
                Ok(None)
            },
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> StorageResult<bool> {
        validate_key(key)?;
        let payload = serde_json::to_vec(value)?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(payload);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let reply: Option<String> = self.query(&cmd).await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let removed: i64 = self.query(redis::cmd("DEL").arg(key)).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let count: i64 = self.query(redis::cmd("EXISTS").arg(key)).await?;
        Ok(count > 0)
    }

    async fn keys(&self, pattern: &str) -> StorageResult<Vec<String>> {
        if pattern.is_empty() {
            return Err(StorageError::InvalidKey("pattern must not be empty".into()));
        }
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .query(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT),
                )
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn ping(&self) -> StorageResult<()> {
        let _: String = self.query(&redis::cmd("PING")).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool> {
        validate_key(key)?;
        let applied: i64 = self
            .query(redis::cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)))
            .await?;
        Ok(applied == 1)
    }

    async fn ttl(&self, key: &str) -> StorageResult<TtlStatus> {
        validate_key(key)?;
        let ms: i64 = self.query(redis::cmd("PTTL").arg(key)).await?;
        Ok(match ms {
            -2 => TtlStatus::Missing,
            ms if ms < 0 => TtlStatus::Persistent,
            ms => TtlStatus::Expires(Duration::from_millis(u64::try_from(ms).unwrap_or(0))),
        })
    }
}
