//! SQLite-backed relational backend.
//!
//! Durable storage with referential integrity. Keys starting with `ctx_` are
//! context nodes and land in `context_nodes`, one column per node field;
//! every other key is an opaque JSON entry in `context_entries`.
//!
//! - Deleting a node cascades through foreign keys to its descendants, its
//!   relationship rows and its tag rows.
//! - A node whose declared parent does not exist is stored anyway: the FK
//!   column stays `NULL`, the declared id is kept in `parent_ref`, and a
//!   warning is logged.
//! - Entries honour TTL passively: rows past `expires_at` are invisible.
//!   Node TTLs are ignored.
//! - Tag, type and parent lookups are served from indexes.

mod pool;
mod schema;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

pub use pool::DbLocation;
use pool::SqlitePool;

use crate::backend::{ContextBackend, Relationship, TtlStatus, is_node_key, validate_key};
use crate::error::{StorageError, StorageResult};
use crate::pattern::KeyPattern;
use crate::retry::{RetryConfig, retry};

/// Connection settings for [`RelationalBackend`].
#[derive(Debug, Clone)]
pub struct RelationalOptions {
    /// Database location.
    pub location: DbLocation,
    /// Connections opened eagerly.
    pub pool_min: usize,
    /// Upper bound on concurrent connections.
    pub pool_max: usize,
    /// How long a connection waits on a locked database.
    pub busy_timeout: Duration,
    /// Backoff policy for the initial connect.
    pub retry: RetryConfig,
}

impl RelationalOptions {
    /// Options for `location` with pool bounds 1..=10 and the default
    /// connect policy.
    #[must_use]
    pub fn new(location: DbLocation) -> Self {
        Self {
            location,
            pool_min: 1,
            pool_max: 10,
            busy_timeout: Duration::from_secs(5),
            retry: RetryConfig::connect(),
        }
    }

    /// Options for a private in-memory database without connect retries.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            retry: RetryConfig::no_retry(),
            ..Self::new(DbLocation::Memory)
        }
    }
}

fn query_err(err: rusqlite::Error) -> StorageError {
    StorageError::Query(err.to_string())
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

fn default_node_type() -> String {
    "generic".to_string()
}

const fn first_version() -> i64 {
    1
}

/// Column-level view of a serialized context node.
#[derive(Debug, Deserialize)]
struct NodeDocument {
    #[serde(alias = "node_id")]
    id: String,
    #[serde(default)]
    data: Value,
    #[serde(default = "default_node_type")]
    node_type: String,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    metadata: Value,
    created_at: String,
    updated_at: String,
    #[serde(default = "first_version")]
    version: i64,
}

const NODE_COLUMNS: &str =
    "id, data, node_type, parent_ref, tags, metadata, created_at, updated_at, version";

fn node_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<[Value; 9]> {
    let text = |idx: usize| row.get::<_, String>(idx);
    Ok([
        Value::String(text(0)?),
        Value::String(text(1)?),
        Value::String(text(2)?),
        row.get::<_, Option<String>>(3)?
            .map_or(Value::Null, Value::String),
        Value::String(text(4)?),
        Value::String(text(5)?),
        Value::String(text(6)?),
        Value::String(text(7)?),
        Value::from(row.get::<_, i64>(8)?),
    ])
}

fn assemble_node(cols: [Value; 9]) -> StorageResult<Value> {
    let [id, data, node_type, parent_id, tags, metadata, created_at, updated_at, version] = cols;
    let parse = |v: Value| -> StorageResult<Value> {
        match v {
            Value::String(s) => Ok(serde_json::from_str(&s)?),
            other => Ok(other),
        }
    };
    Ok(json!({
        "id": id,
        "data": parse(data)?,
        "node_type": node_type,
        "parent_id": parent_id,
        "tags": parse(tags)?,
        "metadata": parse(metadata)?,
        "created_at": created_at,
        "updated_at": updated_at,
        "version": version,
    }))
}

fn node_exists(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM context_nodes WHERE id = ?1)",
        [id],
        |row| row.get(0),
    )
}

fn upsert_node(conn: &mut Connection, key: &str, doc: &NodeDocument) -> StorageResult<()> {
    let data = serde_json::to_string(&doc.data)?;
    let tags = serde_json::to_string(&doc.tags)?;
    let metadata = if doc.metadata.is_null() {
        "{}".to_string()
    } else {
        serde_json::to_string(&doc.metadata)?
    };

    let tx = conn.transaction().map_err(query_err)?;
    if let Some(parent) = doc.parent_id.as_deref()
        && !node_exists(&tx, parent).map_err(query_err)?
    {
        warn!(key, parent_id = parent, "Parent node does not exist, storing dangling reference");
    }
    tx.execute(
        "INSERT INTO context_nodes
             (id, data, node_type, parent_id, parent_ref, tags, metadata, created_at, updated_at, version)
         VALUES (?1, ?2, ?3, (SELECT id FROM context_nodes WHERE id = ?4 AND id != ?1), ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
             data = excluded.data,
             node_type = excluded.node_type,
             parent_id = excluded.parent_id,
             parent_ref = excluded.parent_ref,
             tags = excluded.tags,
             metadata = excluded.metadata,
             updated_at = excluded.updated_at,
             version = excluded.version",
        params![
            key,
            data,
            doc.node_type,
            doc.parent_id,
            tags,
            metadata,
            doc.created_at,
            doc.updated_at,
            doc.version
        ],
    )
    .map_err(query_err)?;

    tx.execute("DELETE FROM context_node_tags WHERE node_id = ?1", [key])
        .map_err(query_err)?;
    for tag in &doc.tags {
        tx.execute(
            "INSERT OR IGNORE INTO context_node_tags (node_id, tag) VALUES (?1, ?2)",
            params![key, tag],
        )
        .map_err(query_err)?;
    }
    tx.commit().map_err(query_err)
}

fn collect_ids(conn: &Connection, sql: &str, arg: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([arg], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

/// Durable backend on SQLite.
pub struct RelationalBackend {
    pool: SqlitePool,
}

impl std::fmt::Debug for RelationalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalBackend")
            .field("location", self.pool.location())
            .field("pool_max", &self.pool.max_size())
            .finish_non_exhaustive()
    }
}

impl RelationalBackend {
    /// Open the database, retrying with backoff, then create the schema and
    /// apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] once every attempt has failed,
    /// or [`StorageError::Query`] if a migration fails.
    pub async fn connect(options: RelationalOptions) -> StorageResult<Self> {
        let outcome = retry(
            &options.retry,
            |attempt| {
                let options = options.clone();
                async move {
                    if attempt > 0 {
                        info!(attempt, location = %options.location, "Retrying database connect");
                    }
                    Self::open(options).await
                }
            },
            StorageError::is_connectivity,
        )
        .await;
        outcome.into_result()
    }

    async fn open(options: RelationalOptions) -> StorageResult<Self> {
        let pool = SqlitePool::open(
            options.location,
            options.pool_min,
            options.pool_max,
            options.busy_timeout,
        )
        .await?;
        let applied = pool
            .with_conn(|conn| schema::initialize(conn).map_err(query_err))
            .await?;
        info!(
            location = %pool.location(),
            migrations_applied = applied.len(),
            "Relational backend ready"
        );
        Ok(Self { pool })
    }

    /// Migration names recorded in the ledger, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] if the ledger cannot be read.
    pub async fn applied_migrations(&self) -> StorageResult<Vec<String>> {
        self.pool
            .with_conn(|conn| schema::applied_migrations(conn).map_err(query_err))
            .await
    }

    /// Where the database lives.
    #[must_use]
    pub fn location(&self) -> &DbLocation {
        self.pool.location()
    }
}

#[async_trait]
impl ContextBackend for RelationalBackend {
    fn name(&self) -> &'static str {
        "relational"
    }

    fn cascades_deletes(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        validate_key(key)?;
        let key = key.to_string();
        if is_node_key(&key) {
            let cols = self
                .pool
                .with_conn(move |conn| {
                    conn.query_row(
                        &format!("SELECT {NODE_COLUMNS} FROM context_nodes WHERE id = ?1"),
                        [&key],
                        node_from_row,
                    )
                    .optional()
                    .map_err(query_err)
                })
                .await?;
            return match cols.map(assemble_node).transpose() {
                Ok(node) => Ok(node),
                Err(e) => {
                    warn!(error = %e, "Undecodable node row treated as miss");
                    Ok(None)
                },
            };
        }

        let raw: Option<String> = self
            .pool
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT value FROM context_entries
                     WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                    params![key, now_millis()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(query_err)
            })
            .await?;
        match raw.map(|s| serde_json::from_str(&s)).transpose() {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(error = %e, "Undecodable entry treated as miss");
                Ok(None)
            },
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> StorageResult<bool> {
        validate_key(key)?;
        let key = key.to_string();
        if is_node_key(&key) {
            let doc: NodeDocument = serde_json::from_value(value.clone())?;
            if doc.id != key {
                return Err(StorageError::InvalidKey(format!(
                    "node id {} does not match key {key}",
                    doc.id
                )));
            }
            if ttl.is_some() {
                debug!(key = %key, "Ignoring TTL for durable node");
            }
            self.pool
                .with_conn(move |conn| upsert_node(conn, &key, &doc))
                .await?;
            return Ok(true);
        }

        let payload = serde_json::to_string(value)?;
        let expires_at = ttl.map(|ttl| now_millis().saturating_add(ttl_millis(ttl)));
        self.pool
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO context_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                    params![key, payload, expires_at],
                )
                .map_err(query_err)
            })
            .await?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let key = key.to_string();
        self.pool
            .with_conn(move |conn| {
                if is_node_key(&key) {
                    let removed = conn
                        .execute("DELETE FROM context_nodes WHERE id = ?1", [&key])
                        .map_err(query_err)?;
                    return Ok(removed > 0);
                }
                let live = conn
                    .execute(
                        "DELETE FROM context_entries
                         WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                        params![key, now_millis()],
                    )
                    .map_err(query_err)?;
                conn.execute("DELETE FROM context_entries WHERE key = ?1", [&key])
                    .map_err(query_err)?;
                Ok(live > 0)
            })
            .await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let key = key.to_string();
        self.pool
            .with_conn(move |conn| {
                if is_node_key(&key) {
                    return node_exists(conn, &key).map_err(query_err);
                }
                conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM context_entries
                     WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2))",
                    params![key, now_millis()],
                    |row| row.get(0),
                )
                .map_err(query_err)
            })
            .await
    }

    async fn keys(&self, pattern: &str) -> StorageResult<Vec<String>> {
        let pattern = KeyPattern::new(pattern)?;
        let like = pattern.to_like();
        let mut keys = self
            .pool
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id FROM context_nodes WHERE id LIKE ?1 ESCAPE '\\'
                         UNION ALL
                         SELECT key FROM context_entries WHERE key LIKE ?1 ESCAPE '\\'
                             AND (expires_at IS NULL OR expires_at > ?2)",
                    )
                    .map_err(query_err)?;
                let rows = stmt
                    .query_map(params![like, now_millis()], |row| row.get::<_, String>(0))
                    .map_err(query_err)?
                    .collect::<rusqlite::Result<Vec<String>>>()
                    .map_err(query_err)?;
                Ok(rows)
            })
            .await?;
        keys.retain(|k| pattern.matches(k));
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> StorageResult<()> {
        self.pool
            .with_conn(|conn| {
                conn.query_row("SELECT 1", [], |_| Ok(()))
                    .map_err(|e| StorageError::Connection(e.to_string()))
            })
            .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool> {
        validate_key(key)?;
        if is_node_key(key) {
            debug!(key, "Nodes are durable, expire ignored");
            return Ok(false);
        }
        let key = key.to_string();
        self.pool
            .with_conn(move |conn| {
                let now = now_millis();
                let updated = conn
                    .execute(
                        "UPDATE context_entries SET expires_at = ?3
                         WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                        params![key, now, now.saturating_add(ttl_millis(ttl))],
                    )
                    .map_err(query_err)?;
                Ok(updated > 0)
            })
            .await
    }

    async fn ttl(&self, key: &str) -> StorageResult<TtlStatus> {
        validate_key(key)?;
        if is_node_key(key) {
            return Ok(if self.exists(key).await? {
                TtlStatus::Persistent
            } else {
                TtlStatus::Missing
            });
        }
        let key = key.to_string();
        let row: Option<Option<i64>> = self
            .pool
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT expires_at FROM context_entries WHERE key = ?1",
                    [&key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(query_err)
            })
            .await?;
        let now = now_millis();
        Ok(match row {
            None => TtlStatus::Missing,
            Some(None) => TtlStatus::Persistent,
            Some(Some(at)) if at <= now => TtlStatus::Missing,
            Some(Some(at)) => TtlStatus::Expires(Duration::from_millis(
                u64::try_from(at.saturating_sub(now)).unwrap_or(0),
            )),
        })
    }

    async fn add_relationship(
        &self,
        parent_id: &str,
        child_id: &str,
        relationship_type: &str,
    ) -> StorageResult<bool> {
        let link = Relationship {
            relationship_type: relationship_type.to_string(),
            ..Relationship::child(parent_id, child_id)
        };
        self.pool
            .with_conn(move |conn| {
                let parent = node_exists(conn, &link.parent_id).map_err(query_err)?;
                let child = node_exists(conn, &link.child_id).map_err(query_err)?;
                if !parent || !child {
                    warn!(
                        parent_id = %link.parent_id,
                        child_id = %link.child_id,
                        parent_exists = parent,
                        child_exists = child,
                        "Relationship endpoint missing, link not recorded"
                    );
                    return Ok(false);
                }
                conn.execute(
                    "INSERT OR IGNORE INTO context_relationships
                         (parent_id, child_id, relationship_type, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        link.parent_id,
                        link.child_id,
                        link.relationship_type,
                        link.created_at.to_rfc3339()
                    ],
                )
                .map_err(query_err)?;
                Ok(true)
            })
            .await
    }

    async fn remove_relationship(&self, parent_id: &str, child_id: &str) -> StorageResult<bool> {
        let (parent_id, child_id) = (parent_id.to_string(), child_id.to_string());
        self.pool
            .with_conn(move |conn| {
                let removed = conn
                    .execute(
                        "DELETE FROM context_relationships WHERE parent_id = ?1 AND child_id = ?2",
                        params![parent_id, child_id],
                    )
                    .map_err(query_err)?;
                Ok(removed > 0)
            })
            .await
    }

    async fn clear_relationships(&self, parent_id: &str) -> StorageResult<bool> {
        let parent_id = parent_id.to_string();
        self.pool
            .with_conn(move |conn| {
                let removed = conn
                    .execute(
                        "DELETE FROM context_relationships WHERE parent_id = ?1",
                        [&parent_id],
                    )
                    .map_err(query_err)?;
                Ok(removed > 0)
            })
            .await
    }

    async fn children(&self, parent_id: &str) -> StorageResult<Vec<Relationship>> {
        let parent_id = parent_id.to_string();
        let rows: Vec<(String, String, String, String)> = self
            .pool
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT parent_id, child_id, relationship_type, created_at
                         FROM context_relationships WHERE parent_id = ?1
                         ORDER BY created_at, child_id",
                    )
                    .map_err(query_err)?;
                let rows = stmt
                    .query_map([&parent_id], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })
                    .map_err(query_err)?
                    .collect::<rusqlite::Result<Vec<(String, String, String, String)>>>()
                    .map_err(query_err)?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(parent_id, child_id, relationship_type, created_at)| {
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?
                    .with_timezone(&Utc);
                Ok(Relationship {
                    parent_id,
                    child_id,
                    relationship_type,
                    created_at,
                })
            })
            .collect()
    }

    async fn find_by_tag(&self, tag: &str) -> StorageResult<Option<Vec<String>>> {
        let tag = tag.to_string();
        self.pool
            .with_conn(move |conn| {
                collect_ids(
                    conn,
                    "SELECT node_id FROM context_node_tags WHERE tag = ?1 ORDER BY node_id",
                    &tag,
                )
                .map(Some)
                .map_err(query_err)
            })
            .await
    }

    async fn find_by_type(&self, node_type: &str) -> StorageResult<Option<Vec<String>>> {
        let node_type = node_type.to_string();
        self.pool
            .with_conn(move |conn| {
                collect_ids(
                    conn,
                    "SELECT id FROM context_nodes WHERE node_type = ?1 ORDER BY created_at, id",
                    &node_type,
                )
                .map(Some)
                .map_err(query_err)
            })
            .await
    }

    async fn find_by_parent(&self, parent_id: &str) -> StorageResult<Option<Vec<String>>> {
        let parent_id = parent_id.to_string();
        self.pool
            .with_conn(move |conn| {
                collect_ids(
                    conn,
                    "SELECT id FROM context_nodes WHERE parent_ref = ?1 ORDER BY created_at, id",
                    &parent_id,
                )
                .map(Some)
                .map_err(query_err)
            })
            .await
    }
}
