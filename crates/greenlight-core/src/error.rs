use thiserror::Error;

/// Top-level error type for the Greenlight system.
///
/// Only hard failures travel through this type. Degraded outcomes (zero
/// vectors, pattern fallback, cache misses) are reported through result
/// variants instead, so callers never string-match log output.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GreenlightError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("De-identification error: {0}")]
    Deidentification(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for GreenlightError {
    fn from(err: toml::de::Error) -> Self {
        GreenlightError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for GreenlightError {
    fn from(err: toml::ser::Error) -> Self {
        GreenlightError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for GreenlightError {
    fn from(err: serde_json::Error) -> Self {
        GreenlightError::Serialization(err.to_string())
    }
}

impl From<regex::Error> for GreenlightError {
    fn from(err: regex::Error) -> Self {
        GreenlightError::Config(format!("invalid pattern: {}", err))
    }
}

/// A specialized `Result` type for Greenlight operations.
pub type Result<T> = std::result::Result<T, GreenlightError>;
