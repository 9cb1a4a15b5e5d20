use std::collections::HashMap;
use std::sync::RwLock;

use greenlight_core::error::{GreenlightError, Result};

use super::{check_key, CacheStats, CacheStore};

/// Process-local cache; contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> GreenlightError {
    GreenlightError::Storage(format!("Cache lock poisoned: {}", e))
}

impl CacheStore for MemoryCacheStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        check_key(key)?;
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries
            .entry(key.to_string())
            .or_insert_with(|| value.to_vec());
        Ok(())
    }

    fn clear(&self) -> Result<usize> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }

    fn stats(&self) -> Result<CacheStats> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(CacheStats {
            entries: entries.len(),
            total_bytes: entries.values().map(|v| v.len() as u64).sum(),
        })
    }
}
