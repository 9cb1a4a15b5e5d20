//! Content-addressed embedding cache.
//!
//! Keys are SHA-256 fingerprints of `"{model}:{text}"`; values are
//! little-endian f32 bytes. Lookups and writes never fail the caller: storage
//! errors are logged and treated as a miss or a dropped write.

use std::sync::Arc;

use greenlight_core::error::Result;
use greenlight_storage::{CacheStats, CacheStore};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Cache key for `text` under `model_name`.
pub fn cache_key(model_name: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.update(b":");
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

pub(crate) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// `None` when the byte length is not a whole number of f32s.
pub(crate) fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Embedding cache for one model.
#[derive(Clone)]
pub struct EmbeddingCache {
    store: Arc<dyn CacheStore>,
    model_name: String,
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field("backend", &self.store.backend())
            .field("model_name", &self.model_name)
            .finish()
    }
}

impl EmbeddingCache {
    pub fn new(store: Arc<dyn CacheStore>, model_name: &str) -> Self {
        Self {
            store,
            model_name: model_name.to_string(),
        }
    }

    pub fn key_for(&self, text: &str) -> String {
        cache_key(&self.model_name, text)
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Cached vector for `key`, if present and decodable.
    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        match self.store.get(key) {
            Ok(Some(bytes)) => {
                let decoded = decode_vector(&bytes);
                if decoded.is_none() {
                    warn!(key, bytes = bytes.len(), "Undecodable cache entry, treating as miss");
                }
                decoded
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store `vector` under `key` unless already present.
    pub fn put(&self, key: &str, vector: &[f32]) {
        if let Err(e) = self.store.put(key, &encode_vector(vector)) {
            warn!(key, error = %e, "Cache write failed, entry dropped");
        } else {
            debug!(key, "Cached embedding");
        }
    }

    pub fn clear(&self) -> Result<usize> {
        self.store.clear()
    }

    pub fn stats(&self) -> Result<CacheStats> {
        self.store.stats()
    }
}
