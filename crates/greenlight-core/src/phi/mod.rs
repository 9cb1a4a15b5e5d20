//! PHI de-identification for clinical note text.
//!
//! Notes pass through an optional external detector and, when it is absent
//! or fails, through an ordered registry of regex rules. The output of either
//! path can be re-scanned by the validator, which produces an advisory report
//! for operators.

pub mod deidentifier;
pub mod patterns;
pub mod synthetic;
pub mod validation;

pub use deidentifier::{
    DeidentificationResult, Deidentified, Deidentifier, PhiDetector, RedactionMethod,
    FAILURE_SENTINEL,
};
pub use patterns::{PatternRegistry, PhiPattern};
pub use synthetic::generate_synthetic_replacement;
pub use validation::ValidationReport;

use serde::{Deserialize, Serialize};

/// Category of protected health information recognized by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhiCategory {
    Name,
    Ssn,
    Phone,
    Email,
    Mrn,
    Date,
    Age,
    Zip,
    Vin,
    Account,
    Url,
    IpAddress,
    /// Site-specific rule supplied through configuration.
    Custom,
}

impl PhiCategory {
    /// Type label fed to the synthetic replacement generator.
    pub fn type_label(&self) -> &'static str {
        match self {
            PhiCategory::Name => "NAME",
            PhiCategory::Ssn => "SSN",
            PhiCategory::Phone => "PHONE",
            PhiCategory::Email => "EMAIL",
            PhiCategory::Mrn => "MRN",
            PhiCategory::Date => "DATE",
            PhiCategory::Age => "AGE",
            PhiCategory::Zip => "ZIP",
            PhiCategory::Vin => "VIN",
            PhiCategory::Account => "ACCOUNT",
            PhiCategory::Url => "URL",
            PhiCategory::IpAddress => "IP",
            PhiCategory::Custom => "CUSTOM",
        }
    }

    /// Bare replacement token for the category.
    pub fn token(&self) -> &'static str {
        match self {
            PhiCategory::Name => "[NAME]",
            PhiCategory::Ssn => "[SSN]",
            PhiCategory::Phone => "[PHONE]",
            PhiCategory::Email => "[EMAIL]",
            PhiCategory::Mrn => "[MRN]",
            PhiCategory::Date => "[DATE]",
            PhiCategory::Age => "[AGE>89]",
            PhiCategory::Zip => "[ZIP]",
            PhiCategory::Vin => "[VIN]",
            PhiCategory::Account => "[ACCOUNT]",
            PhiCategory::Url => "[URL]",
            PhiCategory::IpAddress => "[IP]",
            PhiCategory::Custom => "[REDACTED]",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_bracketed() {
        let all = [
            PhiCategory::Name,
            PhiCategory::Ssn,
            PhiCategory::Phone,
            PhiCategory::Email,
            PhiCategory::Mrn,
            PhiCategory::Date,
            PhiCategory::Age,
            PhiCategory::Zip,
            PhiCategory::Vin,
            PhiCategory::Account,
            PhiCategory::Url,
            PhiCategory::IpAddress,
            PhiCategory::Custom,
        ];
        for category in all {
            let token = category.token();
            assert!(token.starts_with('[') && token.ends_with(']'), "{}", token);
        }
    }

    #[test]
    fn test_age_token_follows_hipaa_threshold() {
        assert_eq!(PhiCategory::Age.token(), "[AGE>89]");
    }

    #[test]
    fn test_category_serializes_snake_case() {
        let json = serde_json::to_string(&PhiCategory::IpAddress).unwrap();
        assert_eq!(json, "\"ip_address\"");
    }
}
