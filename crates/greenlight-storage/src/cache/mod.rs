//! Key/value storage behind the embedding cache.
//!
//! Stores hold opaque byte values under content-addressed keys. Writes are
//! insert-if-absent: a key, once written, never changes.

mod directory;
mod memory;
mod sqlite;

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use greenlight_core::config::{CacheBackend, CacheConfig};
use greenlight_core::error::{GreenlightError, Result};

pub use directory::DirectoryCacheStore;
pub use memory::MemoryCacheStore;
pub use sqlite::SqliteCacheStore;

/// Entry count and payload size of one cache namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
}

/// Storage medium for cached embeddings, scoped to one namespace.
pub trait CacheStore: Send + Sync {
    /// Backend name for logs and `cache stats` output.
    fn backend(&self) -> &'static str;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` unless `key` is already present.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove every entry, returning how many were removed.
    fn clear(&self) -> Result<usize>;

    fn stats(&self) -> Result<CacheStats>;
}

/// Open the configured backend for `namespace`. Relative paths resolve
/// against `data_dir`.
pub fn open_store(
    config: &CacheConfig,
    data_dir: &Path,
    namespace: &str,
) -> Result<Arc<dyn CacheStore>> {
    let store: Arc<dyn CacheStore> = match config.backend {
        CacheBackend::Sqlite => Arc::new(SqliteCacheStore::open(
            &data_dir.join(&config.sqlite_file),
            namespace,
        )?),
        CacheBackend::Directory => Arc::new(DirectoryCacheStore::open(
            &data_dir.join(&config.directory),
            namespace,
        )?),
        CacheBackend::Memory => Arc::new(MemoryCacheStore::new()),
    };
    Ok(store)
}

/// Keys become file names and SQL values; restrict them to a safe alphabet.
pub(crate) fn check_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(GreenlightError::Storage(format!("invalid cache key: {:?}", key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenlight_core::config::CacheConfig;

    #[test]
    fn test_check_key() {
        assert!(check_key("abc123DEF").is_ok());
        assert!(check_key("a-b_c").is_ok());
        assert!(check_key("").is_err());
        assert!(check_key("../etc/passwd").is_err());
        assert!(check_key("a b").is_err());
    }

    #[test]
    fn test_open_store_each_backend() {
        let dir = tempfile::tempdir().unwrap();
        for (backend, name) in [
            (CacheBackend::Sqlite, "sqlite"),
            (CacheBackend::Directory, "directory"),
            (CacheBackend::Memory, "memory"),
        ] {
            let config = CacheConfig {
                backend,
                ..CacheConfig::default()
            };
            let store = open_store(&config, dir.path(), "model-a").unwrap();
            assert_eq!(store.backend(), name);

            store.put("k1", &[1, 2, 3]).unwrap();
            assert_eq!(store.get("k1").unwrap(), Some(vec![1, 2, 3]));
            assert_eq!(store.get("missing").unwrap(), None);
        }
        assert!(dir.path().join("embedding_cache.db").exists());
        assert!(dir.path().join("cache/embeddings").exists());
    }
}
