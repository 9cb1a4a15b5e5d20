//! Ordered regex registry used by the pattern fallback and the validator.

use regex::{Captures, Regex};
use tracing::debug;

use super::synthetic::generate_synthetic_replacement;
use super::PhiCategory;
use crate::config::{DeidConfig, ExtraPattern, ReplacementStyle};
use crate::error::{GreenlightError, Result};

/// Built-in rules in application order: (name, category, regex, replacement).
///
/// Every rule except `names` is compiled case-insensitive. `names` takes a
/// whole run of capitalized words so a leading title or verb cannot split a
/// first name from its surname. Prefix-kept rules
/// capture `prefix` and `value`; the replacement template keeps the prefix.
const BUILTIN_RULES: &[(&str, PhiCategory, &str, &str)] = &[
    (
        "names",
        PhiCategory::Name,
        r"(?m)\b[A-Z][a-z]+(?: [A-Z][a-z]+)+\b",
        "[NAME]",
    ),
    (
        "ssn",
        PhiCategory::Ssn,
        r"(?im)\b\d{3}-?\d{2}-?\d{4}\b",
        "[SSN]",
    ),
    (
        "phone",
        PhiCategory::Phone,
        r"(?im)(?:\+?1[-.\s]?)?(?:\(\d{3}\)|\b\d{3})[-.\s]?\d{3}[-.\s]?\d{4}\b",
        "[PHONE]",
    ),
    (
        "email",
        PhiCategory::Email,
        r"(?im)\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        "[EMAIL]",
    ),
    (
        "mrn",
        PhiCategory::Mrn,
        r"(?im)\b(?P<prefix>MRN|Medical Record|Patient ID):?\s*(?P<value>[A-Z0-9]{6,})\b",
        "${prefix}: [MRN]",
    ),
    (
        "dates",
        PhiCategory::Date,
        r"(?im)\b(?:\d{1,2}[/-]\d{1,2}[/-]\d{4}|\d{4}-\d{2}-\d{2}(?:T\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:\d{2})?)?|(?:Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|June?|July?|Aug(?:ust)?|Sep(?:t(?:ember)?)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)\.?\s+\d{1,2}(?:st|nd|rd|th)?,?\s+\d{4})\b",
        "[DATE]",
    ),
    (
        "ages_over_89",
        PhiCategory::Age,
        r"(?im)\b(?:age\s+)?(?:9\d|[1-9]\d{2,})\s*-?\s*(?:years?[\s-]*old\b|y\.?o\b\.?)",
        "[AGE>89]",
    ),
    (
        "zip_specific",
        PhiCategory::Zip,
        r"(?im)\b\d{5}(?:-\d{4})?\b",
        "[ZIP]",
    ),
    (
        "vehicle_ids",
        PhiCategory::Vin,
        r"(?im)\b[A-HJ-NPR-Z0-9]{17}\b",
        "[VIN]",
    ),
    (
        "account_numbers",
        PhiCategory::Account,
        r"(?im)\b(?P<prefix>Account|Acct)\.?\s*(?:#|No\.?|Number)?\s*:?\s*(?P<value>[A-Z0-9]{8,})\b",
        "${prefix}: [ACCOUNT]",
    ),
    ("urls", PhiCategory::Url, r"(?im)https?://\S+", "[URL]"),
    (
        "ip_addresses",
        PhiCategory::IpAddress,
        r"(?im)\b(?:\d{1,3}\.){3}\d{1,3}\b",
        "[IP]",
    ),
];

/// A single PHI rule: a compiled matcher plus its replacement template.
#[derive(Debug, Clone)]
pub struct PhiPattern {
    name: String,
    category: PhiCategory,
    regex: Regex,
    replacement: String,
    keeps_prefix: bool,
}

impl PhiPattern {
    /// Compile a rule. `replacement` may reference capture groups with
    /// `$name` or `${name}`.
    pub fn new(
        name: impl Into<String>,
        category: PhiCategory,
        pattern: &str,
        replacement: impl Into<String>,
    ) -> Result<Self> {
        let regex = Regex::new(pattern)?;
        let keeps_prefix = has_group(&regex, "prefix") && has_group(&regex, "value");
        Ok(Self {
            name: name.into(),
            category,
            regex,
            replacement: replacement.into(),
            keeps_prefix,
        })
    }

    /// Compile a site-specific rule from configuration. The expression is
    /// wrapped case-insensitive and multi-line like the built-in rules.
    pub fn from_extra(extra: &ExtraPattern) -> Result<Self> {
        if extra.name.trim().is_empty() {
            return Err(GreenlightError::Config(
                "extra pattern name must not be empty".to_string(),
            ));
        }
        Self::new(
            extra.name.clone(),
            PhiCategory::Custom,
            &format!("(?im){}", extra.pattern),
            extra.replacement.clone(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> PhiCategory {
        self.category
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    /// Rewrite every match in `text`, returning the new text and the number
    /// of matches replaced.
    pub fn apply(&self, text: &str, style: ReplacementStyle) -> (String, usize) {
        let mut count = 0usize;
        let rewritten = self.regex.replace_all(text, |caps: &Captures<'_>| {
            count += 1;
            match style {
                ReplacementStyle::Token => self.expand_template(caps),
                ReplacementStyle::Synthetic => self.synthesize(caps),
            }
        });
        (rewritten.into_owned(), count)
    }

    /// All matched substrings in `text`, in order.
    pub fn find_all(&self, text: &str) -> Vec<String> {
        self.regex
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    fn expand_template(&self, caps: &Captures<'_>) -> String {
        let mut out = String::new();
        caps.expand(&self.replacement, &mut out);
        out
    }

    fn synthesize(&self, caps: &Captures<'_>) -> String {
        // Ages are generalized, not pseudonymized.
        if self.category == PhiCategory::Age {
            return self.expand_template(caps);
        }

        let phi_type = match self.category {
            PhiCategory::Custom => self.name.to_uppercase(),
            other => other.type_label().to_string(),
        };

        if self.keeps_prefix {
            let prefix = caps.name("prefix").map_or("", |m| m.as_str());
            let value = caps.name("value").map_or("", |m| m.as_str());
            format!(
                "{}: {}",
                prefix,
                generate_synthetic_replacement(&phi_type, value)
            )
        } else {
            generate_synthetic_replacement(&phi_type, &caps[0])
        }
    }
}

fn has_group(regex: &Regex, group: &str) -> bool {
    regex.capture_names().flatten().any(|name| name == group)
}

/// Immutable, ordered set of PHI rules.
///
/// Order is precedence: each rule runs over the output of the previous one.
#[derive(Debug, Clone)]
pub struct PatternRegistry {
    patterns: Vec<PhiPattern>,
}

impl PatternRegistry {
    /// The twelve built-in rules in their fixed order.
    pub fn builtin() -> Self {
        let patterns = BUILTIN_RULES
            .iter()
            .map(|(name, category, pattern, replacement)| {
                PhiPattern::new(*name, *category, pattern, *replacement)
                    .expect("Invalid built-in PHI regex")
            })
            .collect();
        Self { patterns }
    }

    /// Built-in rules followed by the configured site-specific rules.
    pub fn from_config(config: &DeidConfig) -> Result<Self> {
        let mut registry = Self::builtin();
        for extra in &config.extra_patterns {
            registry.patterns.push(PhiPattern::from_extra(extra)?);
        }
        debug!(
            builtin = BUILTIN_RULES.len(),
            extra = config.extra_patterns.len(),
            "PHI pattern registry compiled"
        );
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PhiPattern> {
        self.patterns.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.patterns.iter().map(|p| p.name()).collect()
    }

    /// Run every rule in order over a working copy of `text`.
    pub fn apply(&self, text: &str, style: ReplacementStyle) -> (String, usize) {
        let mut working = text.to_string();
        let mut total = 0usize;
        for pattern in &self.patterns {
            let (next, count) = pattern.apply(&working, style);
            if count > 0 {
                working = next;
                total += count;
            }
        }
        (working, total)
    }

    /// Replace every registry token in `text` with a single space.
    pub fn mask_tokens(&self, text: &str) -> String {
        let mut masked = text.to_string();
        for pattern in &self.patterns {
            let token = pattern.category().token();
            if masked.contains(token) {
                masked = masked.replace(token, " ");
            }
        }
        masked
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
