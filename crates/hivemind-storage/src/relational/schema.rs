//! Base schema and the migration ledger.
//!
//! The base tables are created with `IF NOT EXISTS` on every start. Later
//! changes are named migrations applied in order, each exactly once, with the
//! name recorded in `migrations` inside the same transaction.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

/// Tables every database starts with.
pub(crate) const BASE_SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS context_nodes (
    id          TEXT PRIMARY KEY,
    data        TEXT NOT NULL,
    node_type   TEXT NOT NULL DEFAULT 'generic',
    parent_id   TEXT REFERENCES context_nodes(id) ON DELETE CASCADE,
    tags        TEXT NOT NULL DEFAULT '[]',
    metadata    TEXT NOT NULL DEFAULT '{}',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    version     INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_context_nodes_node_type ON context_nodes(node_type);
CREATE INDEX IF NOT EXISTS idx_context_nodes_parent_id ON context_nodes(parent_id);

CREATE TABLE IF NOT EXISTS context_relationships (
    parent_id         TEXT NOT NULL REFERENCES context_nodes(id) ON DELETE CASCADE,
    child_id          TEXT NOT NULL REFERENCES context_nodes(id) ON DELETE CASCADE,
    relationship_type TEXT NOT NULL DEFAULT 'child',
    created_at        TEXT NOT NULL,
    PRIMARY KEY (parent_id, child_id)
);

CREATE TABLE IF NOT EXISTS migrations (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    applied_at  TEXT NOT NULL
);
";

/// A named, ordered schema change.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Migration {
    pub(crate) name: &'static str,
    pub(crate) sql: &'static str,
}

/// Every migration in application order.
pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "0001_initial_schema",
        sql: "",
    },
    Migration {
        name: "0002_node_tag_index",
        sql: r"
CREATE TABLE IF NOT EXISTS context_node_tags (
    node_id TEXT NOT NULL REFERENCES context_nodes(id) ON DELETE CASCADE,
    tag     TEXT NOT NULL,
    PRIMARY KEY (node_id, tag)
);
CREATE INDEX IF NOT EXISTS idx_context_node_tags_tag ON context_node_tags(tag);
INSERT OR IGNORE INTO context_node_tags (node_id, tag)
    SELECT context_nodes.id, json_each.value
    FROM context_nodes, json_each(context_nodes.tags);
",
    },
    Migration {
        name: "0003_context_entries",
        sql: r"
CREATE TABLE IF NOT EXISTS context_entries (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL,
    expires_at  INTEGER
);
CREATE INDEX IF NOT EXISTS idx_context_entries_expires_at ON context_entries(expires_at);
",
    },
    Migration {
        name: "0004_parent_reference",
        sql: r"
ALTER TABLE context_nodes ADD COLUMN parent_ref TEXT;
UPDATE context_nodes SET parent_ref = parent_id WHERE parent_ref IS NULL;
CREATE INDEX IF NOT EXISTS idx_context_nodes_parent_ref ON context_nodes(parent_ref);
",
    },
];

/// Create the base schema and apply pending migrations.
///
/// Returns the names applied by this call.
pub(crate) fn initialize(conn: &mut Connection) -> rusqlite::Result<Vec<&'static str>> {
    conn.execute_batch(BASE_SCHEMA)?;

    let mut applied = Vec::new();
    for migration in MIGRATIONS {
        let already: Option<i64> = conn
            .query_row(
                "SELECT id FROM migrations WHERE name = ?1",
                [migration.name],
                |row| row.get(0),
            )
            .optional()?;
        if already.is_some() {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO migrations (name, applied_at) VALUES (?1, ?2)",
            params![migration.name, chrono::Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        info!(migration = migration.name, "Applied migration");
        applied.push(migration.name);
    }
    Ok(applied)
}

/// Names recorded in the ledger, in application order.
pub(crate) fn applied_migrations(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM migrations ORDER BY id")?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn
    }

    #[test]
    fn test_initialize_applies_all_in_order() {
        let mut conn = memory_conn();
        let applied = initialize(&mut conn).unwrap();
        let expected: Vec<&str> = MIGRATIONS.iter().map(|m| m.name).collect();
        assert_eq!(applied, expected);
        assert_eq!(applied_migrations(&conn).unwrap(), expected);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut conn = memory_conn();
        initialize(&mut conn).unwrap();
        let second = initialize(&mut conn).unwrap();
        assert!(second.is_empty());
        assert_eq!(applied_migrations(&conn).unwrap().len(), MIGRATIONS.len());
    }

    #[test]
    fn test_tag_backfill_from_existing_rows() {
        let mut conn = memory_conn();
        conn.execute_batch(BASE_SCHEMA).unwrap();
        conn.execute(
            "INSERT INTO context_nodes (id, data, tags, created_at, updated_at)
             VALUES ('ctx_1', '{}', '[\"a\",\"b\"]', 't', 't')",
            [],
        )
        .unwrap();

        initialize(&mut conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM context_node_tags WHERE node_id = 'ctx_1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_partial_ledger_resumes() {
        let mut conn = memory_conn();
        conn.execute_batch(BASE_SCHEMA).unwrap();
        conn.execute(
            "INSERT INTO migrations (name, applied_at) VALUES ('0001_initial_schema', 'x')",
            [],
        )
        .unwrap();

        let applied = initialize(&mut conn).unwrap();
        assert_eq!(applied.first().copied(), Some("0002_node_tag_index"));
        assert_eq!(applied.len(), MIGRATIONS.len().saturating_sub(1));
    }
}
