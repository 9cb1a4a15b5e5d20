pub mod config;
pub mod error;
pub mod phi;
pub mod worker;

pub use config::GreenlightConfig;
pub use error::{GreenlightError, Result};
pub use phi::{
    DeidentificationResult, Deidentified, Deidentifier, PatternRegistry, PhiCategory,
    PhiDetector, PhiPattern, RedactionMethod, ValidationReport, FAILURE_SENTINEL,
};
pub use worker::WorkerPool;
