use serde::{Deserialize, Serialize};

use super::patterns::PatternRegistry;

/// Substrings that hint at PHI the rules may have missed. Matched
/// case-insensitively.
const PHI_INDICATORS: [&str; 6] = ["DOB", "SSN", "@", "phone", "address", "born on"];

/// Advisory report produced by re-scanning de-identified output.
///
/// Never blocks the output; callers decide whether to surface it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// False when any registry rule still matches the output.
    pub is_valid: bool,
    /// Length of the input, in chars.
    pub original_length: usize,
    /// Length of the output, in chars.
    pub output_length: usize,
    pub issues: Vec<String>,
    /// Substrings of the output that still look like PHI.
    pub phi_detected: Vec<String>,
    /// `(original_length - output_length) / original_length`, or 0 for empty input.
    pub reduction_ratio: f64,
}

/// Re-scan `output` with every registry rule and the indicator list.
pub fn validate(registry: &PatternRegistry, original: &str, output: &str) -> ValidationReport {
    let original_length = original.chars().count();
    let output_length = output.chars().count();

    let mut report = ValidationReport {
        is_valid: true,
        original_length,
        output_length,
        issues: Vec::new(),
        phi_detected: Vec::new(),
        reduction_ratio: reduction_ratio(original_length, output_length),
    };

    for pattern in registry.iter() {
        let matches = pattern.find_all(output);
        if !matches.is_empty() {
            report.is_valid = false;
            report.issues.push(format!(
                "Potential {} found: {} instances",
                pattern.name(),
                matches.len()
            ));
            report.phi_detected.extend(matches);
        }
    }

    // Registry tokens are not indicators: "[SSN]" must not flag "SSN".
    let masked = registry.mask_tokens(output).to_lowercase();
    let remaining: Vec<&str> = PHI_INDICATORS
        .iter()
        .copied()
        .filter(|indicator| masked.contains(&indicator.to_lowercase()))
        .collect();
    if !remaining.is_empty() {
        report
            .issues
            .push(format!("PHI indicators still present: {}", remaining.join(", ")));
    }

    report
}

fn reduction_ratio(original_length: usize, output_length: usize) -> f64 {
    if original_length == 0 {
        return 0.0;
    }
    (original_length as f64 - output_length as f64) / original_length as f64
}
