use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{GreenlightError, Result};

/// Top-level configuration for Greenlight.
///
/// Loaded from `~/.greenlight/config.toml` by default and passed by value into
/// each engine's constructor. There is no process-wide settings instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GreenlightConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub deid: DeidConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
}

impl GreenlightConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GreenlightConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| GreenlightError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the embedding cache and other local state.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.greenlight/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl GeneralConfig {
    /// The data directory with a leading `~` expanded to the home directory.
    pub fn resolved_data_dir(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }
}

/// How the pattern fallback rewrites matched PHI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacementStyle {
    /// Bare category tokens such as `[NAME]` or `[DATE]`.
    #[default]
    Token,
    /// Deterministic pseudonyms such as `Patient_1A2B3C4D`.
    Synthetic,
}

/// De-identification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeidConfig {
    /// Replacement style used by the pattern fallback.
    pub replacement_style: ReplacementStyle,
    /// Inputs larger than this are refused by the pattern fallback.
    pub max_input_bytes: usize,
    /// Upper bound on a single external detector call (async path only).
    pub detector_timeout_ms: u64,
    /// Log validation issues at warn level after each de-identification.
    pub report_issues: bool,
    /// Site-specific rules applied after the built-in registry, in order.
    pub extra_patterns: Vec<ExtraPattern>,
}

/// A site-specific PHI rule supplied through configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraPattern {
    /// Rule name used in validation issues.
    pub name: String,
    /// Regular expression, compiled case-insensitive and multi-line.
    pub pattern: String,
    /// Replacement template; `$name` / `${name}` refer to capture groups.
    pub replacement: String,
}

impl Default for DeidConfig {
    fn default() -> Self {
        Self {
            replacement_style: ReplacementStyle::Token,
            max_input_bytes: 1024 * 1024,
            detector_timeout_ms: 5_000,
            report_issues: true,
            extra_patterns: Vec::new(),
        }
    }
}

/// Which embedding backend to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Sentence-transformer ONNX export run through ONNX Runtime.
    #[default]
    Onnx,
    /// Deterministic hash vectors; no model files needed.
    Mock,
}

/// Embedding model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model identifier. Also namespaces the embedding cache.
    pub model_name: String,
    /// Backend used to run the model.
    pub backend: EmbeddingBackend,
    /// Directory containing `model.onnx` and `tokenizer.json`.
    pub model_dir: String,
    /// Default batch size for batched embedding.
    pub batch_size: usize,
    /// Vector dimension used by the mock backend.
    pub mock_dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            backend: EmbeddingBackend::Onnx,
            model_dir: "~/.greenlight/models/all-MiniLM-L6-v2".to_string(),
            batch_size: 32,
            mock_dimensions: 384,
        }
    }
}

impl EmbeddingConfig {
    /// The model directory with a leading `~` expanded.
    pub fn resolved_model_dir(&self) -> PathBuf {
        expand_home(&self.model_dir)
    }
}

/// Storage medium for the embedding cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Sqlite,
    Directory,
    Memory,
}

/// Embedding cache settings. Paths are relative to the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// SQLite file used by the `sqlite` backend.
    pub sqlite_file: String,
    /// Directory used by the `directory` backend.
    pub directory: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Sqlite,
            sqlite_file: "embedding_cache.db".to_string(),
            directory: "cache/embeddings".to_string(),
        }
    }
}

/// Policy search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Default number of results.
    pub default_limit: usize,
    /// Maximum number of results.
    pub max_limit: usize,
    /// Minimum cosine similarity for a policy match.
    pub min_score: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            max_limit: 100,
            min_score: 0.7,
        }
    }
}

/// Worker pool settings for CPU-bound offloading.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum number of concurrently running blocking jobs.
    pub max_blocking_jobs: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_blocking_jobs: 4,
        }
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}
