use std::path::Path;

use rusqlite::{params, OptionalExtension};
use tracing::debug;

use greenlight_core::error::Result;

use super::{check_key, CacheStats, CacheStore};
use crate::db::{storage_err, Database};

/// Cache rows in the `embedding_cache` table, scoped by namespace.
#[derive(Debug)]
pub struct SqliteCacheStore {
    db: Database,
    namespace: String,
}

impl SqliteCacheStore {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: &Path, namespace: &str) -> Result<Self> {
        Ok(Self::with_database(Database::new(path)?, namespace))
    }

    pub fn in_memory(namespace: &str) -> Result<Self> {
        Ok(Self::with_database(Database::in_memory()?, namespace))
    }

    pub fn with_database(db: Database, namespace: &str) -> Self {
        Self {
            db,
            namespace: namespace.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl CacheStore for SqliteCacheStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT vector FROM embedding_cache WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(storage_err("Failed to read cache entry"))
        })
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        check_key(key)?;
        self.db.with_conn(|conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO embedding_cache (namespace, key, vector)
                     VALUES (?1, ?2, ?3)",
                    params![self.namespace, key, value],
                )
                .map_err(storage_err("Failed to write cache entry"))?;
            if inserted == 0 {
                debug!(key, "Cache entry already present");
            }
            Ok(())
        })
    }

    fn clear(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM embedding_cache WHERE namespace = ?1",
                params![self.namespace],
            )
            .map_err(storage_err("Failed to clear cache"))
        })
    }

    fn stats(&self) -> Result<CacheStats> {
        self.db.with_conn(|conn| {
            let (entries, total_bytes): (i64, i64) = conn
                .query_row(
                    "SELECT COUNT(*), COALESCE(SUM(LENGTH(vector)), 0)
                     FROM embedding_cache WHERE namespace = ?1",
                    params![self.namespace],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(storage_err("Failed to read cache stats"))?;
            Ok(CacheStats {
                entries: entries as usize,
                total_bytes: total_bytes as u64,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_put() {
        let store = SqliteCacheStore::in_memory("model-a").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        store.put("k", &[1, 2, 3, 4]).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_put_is_insert_if_absent() {
        let store = SqliteCacheStore::in_memory("model-a").unwrap();
        store.put("k", &[1]).unwrap();
        store.put("k", &[2]).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(vec![1]));
    }

    #[test]
    fn test_rejects_bad_key() {
        let store = SqliteCacheStore::in_memory("model-a").unwrap();
        assert!(store.put("bad key", &[1]).is_err());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let store = SqliteCacheStore::open(&path, "model-a").unwrap();
            store.put("k", &[9, 9]).unwrap();
        }
        let store = SqliteCacheStore::open(&path, "model-a").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(vec![9, 9]));
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let a = SqliteCacheStore::open(&path, "model-a").unwrap();
        let b = SqliteCacheStore::open(&path, "model-b").unwrap();

        a.put("k", &[1]).unwrap();
        assert_eq!(b.get("k").unwrap(), None);

        b.put("k", &[2, 2]).unwrap();
        assert_eq!(a.get("k").unwrap(), Some(vec![1]));

        assert_eq!(a.clear().unwrap(), 1);
        assert_eq!(b.get("k").unwrap(), Some(vec![2, 2]));
        assert_eq!(
            b.stats().unwrap(),
            CacheStats {
                entries: 1,
                total_bytes: 2
            }
        );
    }

    #[test]
    fn test_stats_empty() {
        let store = SqliteCacheStore::in_memory("m").unwrap();
        assert_eq!(store.stats().unwrap(), CacheStats::default());
    }
}
