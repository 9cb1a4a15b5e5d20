//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use greenlight_core::error::Result;

use crate::db::storage_err;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(storage_err("Failed to create migrations table"))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(storage_err("Failed to query migration version"))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: embedding_cache");
    }

    Ok(())
}

/// Version 1: content-addressed embedding cache.
///
/// `namespace` is the model name so several models can share one file.
/// Vectors are little-endian f32 blobs.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS embedding_cache (
            namespace   TEXT NOT NULL,
            key         TEXT NOT NULL,
            vector      BLOB NOT NULL,
            created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            PRIMARY KEY (namespace, key)
        ) WITHOUT ROWID;

        INSERT INTO schema_migrations (version, name) VALUES (1, 'embedding_cache');
        ",
    )
    .map_err(storage_err("Failed to apply migration v1"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, 1);
    }

    #[test]
    fn test_cache_table_primary_key() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO embedding_cache (namespace, key, vector) VALUES ('m', 'k', x'00')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO embedding_cache (namespace, key, vector) VALUES ('m', 'k', x'01')",
            [],
        );
        assert!(dup.is_err());
        // Same key under another namespace is a distinct row.
        conn.execute(
            "INSERT INTO embedding_cache (namespace, key, vector) VALUES ('other', 'k', x'01')",
            [],
        )
        .unwrap();
    }
}
