//! Bounded SQLite connection pool.
//!
//! `rusqlite` is synchronous, so every use of a connection runs on Tokio's
//! blocking pool. A semaphore caps concurrent users at `max`; idle
//! connections are kept for reuse and new ones are opened lazily up to the
//! cap. An in-memory database lives inside its single connection, so it is
//! always pooled as exactly one.
//!
//! The permit and the connection both travel into the blocking closure and
//! go back before it returns. Dropping the awaiting future therefore never
//! loses a connection, which matters most for an in-memory database.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    /// A private in-memory database.
    Memory,
    /// A database file, created if missing.
    File(PathBuf),
}

impl DbLocation {
    /// Parse a database URL.
    ///
    /// Accepts `sqlite::memory:`, `:memory:`, `sqlite://<path>`,
    /// `sqlite:<path>`, or a bare filesystem path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] for other URL schemes or an
    /// empty path.
    pub fn parse(url: &str) -> StorageResult<Self> {
        let url = url.trim();
        if matches!(url, "sqlite::memory:" | ":memory:" | "sqlite://:memory:") {
            return Ok(Self::Memory);
        }
        let path = if let Some(rest) = url.strip_prefix("sqlite://") {
            rest
        } else if let Some(rest) = url.strip_prefix("sqlite:") {
            rest
        } else if url.contains("://") {
            return Err(StorageError::Connection(format!(
                "unsupported database url scheme: {}",
                url.split("://").next().unwrap_or_default()
            )));
        } else {
            url
        };
        if path.is_empty() {
            return Err(StorageError::Connection("database path is empty".into()));
        }
        Ok(Self::File(PathBuf::from(path)))
    }

    fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }
}

impl std::fmt::Display for DbLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str(":memory:"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

fn open_connection(location: &DbLocation, busy_timeout: Duration) -> StorageResult<Connection> {
    let conn = match location {
        DbLocation::Memory => Connection::open_in_memory(),
        DbLocation::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Connection(format!("{}: {e}", parent.display()))
                })?;
            }
            Connection::open(path)
        },
    }
    .map_err(|e| StorageError::Connection(format!("{location}: {e}")))?;

    let configure = || -> rusqlite::Result<()> {
        conn.busy_timeout(busy_timeout)?;
        if !location.is_memory() {
            conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
        }
        conn.execute_batch("PRAGMA foreign_keys=ON;")
    };
    configure().map_err(|e| StorageError::Connection(format!("{location}: {e}")))?;
    Ok(conn)
}

pub(crate) struct SqlitePool {
    location: DbLocation,
    busy_timeout: Duration,
    idle: Arc<Mutex<Vec<Connection>>>,
    permits: Arc<Semaphore>,
    max: usize,
}

impl SqlitePool {
    /// Open `min` connections eagerly. Bounds are normalized so that
    /// `1 <= min <= max`, and in-memory databases use exactly one.
    pub(crate) async fn open(
        location: DbLocation,
        min: usize,
        max: usize,
        busy_timeout: Duration,
    ) -> StorageResult<Self> {
        let max = if location.is_memory() { 1 } else { max.max(1) };
        let min = min.clamp(1, max);

        let opener = location.clone();
        let conns = tokio::task::spawn_blocking(move || {
            (0..min)
                .map(|_| open_connection(&opener, busy_timeout))
                .collect::<StorageResult<Vec<Connection>>>()
        })
        .await
        .map_err(|e| StorageError::Internal(format!("sqlite worker failed: {e}")))??;

        debug!(%location, min, max, "Opened sqlite pool");
        Ok(Self {
            location,
            busy_timeout,
            idle: Arc::new(Mutex::new(conns)),
            permits: Arc::new(Semaphore::new(max)),
            max,
        })
    }

    pub(crate) fn location(&self) -> &DbLocation {
        &self.location
    }

    pub(crate) fn max_size(&self) -> usize {
        self.max
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or_default()
    }

    /// Run `f` with exclusive use of one pooled connection.
    pub(crate) async fn with_conn<F, R>(&self, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut Connection) -> StorageResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        let idle = Arc::clone(&self.idle);
        let location = self.location.clone();
        let busy_timeout = self.busy_timeout;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let pooled = idle
                .lock()
                .map_err(|e| StorageError::Internal(e.to_string()))?
                .pop();
            let mut conn = match pooled {
                Some(conn) => conn,
                None => open_connection(&location, busy_timeout)?,
            };
            let result = f(&mut conn);
            idle.lock()
                .map_err(|e| StorageError::Internal(e.to_string()))?
                .push(conn);
            result
        })
        .await
        .map_err(|e| StorageError::Internal(format!("sqlite worker failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_locations() {
        assert_eq!(DbLocation::parse("sqlite::memory:").unwrap(), DbLocation::Memory);
        assert_eq!(DbLocation::parse(":memory:").unwrap(), DbLocation::Memory);
        assert_eq!(
            DbLocation::parse("sqlite:///var/lib/hivemind/ctx.db").unwrap(),
            DbLocation::File(PathBuf::from("/var/lib/hivemind/ctx.db"))
        );
        assert_eq!(
            DbLocation::parse("sqlite:data/ctx.db").unwrap(),
            DbLocation::File(PathBuf::from("data/ctx.db"))
        );
        assert_eq!(
            DbLocation::parse("ctx.db").unwrap(),
            DbLocation::File(PathBuf::from("ctx.db"))
        );
    }

    #[test]
    fn test_parse_rejects_foreign_scheme() {
        let err = DbLocation::parse("postgresql://u:p@db/mcp").unwrap_err();
        assert!(err.to_string().contains("postgresql"));
        assert!(DbLocation::parse("sqlite://").is_err());
    }

    #[tokio::test]
    async fn test_memory_pool_is_single_connection() {
        let pool = SqlitePool::open(DbLocation::Memory, 4, 10, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(pool.max_size(), 1);
        pool.with_conn(|conn| {
            conn.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (7);")
                .map_err(|e| StorageError::Query(e.to_string()))
        })
        .await
        .unwrap();
        // Same database on the next checkout.
        let x: i64 = pool
            .with_conn(|conn| {
                conn.query_row("SELECT x FROM t", [], |row| row.get(0))
                    .map_err(|e| StorageError::Query(e.to_string()))
            })
            .await
            .unwrap();
        assert_eq!(x, 7);
    }

    #[tokio::test]
    async fn test_file_pool_grows_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let location = DbLocation::File(dir.path().join("nested/pool.db"));
        let pool = SqlitePool::open(location, 1, 3, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.max_size(), 3);

        let fk: i64 = pool
            .with_conn(|conn| {
                conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))
                    .map_err(|e| StorageError::Query(e.to_string()))
            })
            .await
            .unwrap();
        assert_eq!(fk, 1);
        assert!(dir.path().join("nested/pool.db").exists());
    }

    #[tokio::test]
    async fn test_abandoned_call_keeps_memory_database() {
        let pool = SqlitePool::open(DbLocation::Memory, 1, 1, Duration::from_secs(1))
            .await
            .unwrap();
        pool.with_conn(|conn| {
            conn.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (7);")
                .map_err(|e| StorageError::Query(e.to_string()))
        })
        .await
        .unwrap();

        // The caller gives up while the query is still running.
        let slow = pool.with_conn(|conn| {
            std::thread::sleep(Duration::from_millis(200));
            conn.query_row("SELECT x FROM t", [], |row| row.get::<_, i64>(0))
                .map_err(|e| StorageError::Query(e.to_string()))
        });
        assert!(
            tokio::time::timeout(Duration::from_millis(10), slow)
                .await
                .is_err()
        );

        let x: i64 = pool
            .with_conn(|conn| {
                conn.query_row("SELECT x FROM t", [], |row| row.get(0))
                    .map_err(|e| StorageError::Query(e.to_string()))
            })
            .await
            .unwrap();
        assert_eq!(x, 7);
        assert_eq!(pool.idle_count(), 1);
    }
}
