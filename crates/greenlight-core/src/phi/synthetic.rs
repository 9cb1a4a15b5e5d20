use sha2::{Digest, Sha256};

/// Deterministic pseudonym for a PHI value.
///
/// The same `(phi_type, value)` pair always yields the same replacement, so a
/// patient keeps one identity across every note in a corpus.
pub fn generate_synthetic_replacement(phi_type: &str, value: &str) -> String {
    let h = short_hash(phi_type, value);

    match phi_type {
        "NAME" => format!("Patient_{}", h),
        "SSN" => format!("XXX-XX-{}", &h[..4]),
        "PHONE" => format!("({}) {}-{}", &h[..3], &h[3..6], &h[6..]),
        "EMAIL" => format!("patient_{}@example.com", h),
        "MRN" => format!("MRN_{}", h),
        "DATE" => format!("[DATE_{}]", &h[..4]),
        "ZIP" => h[..5].to_string(),
        "ACCOUNT" => format!("ACCT_{}", h),
        other => format!("[{}_{}]", other, h),
    }
}

/// First 8 hex characters, uppercased, of SHA-256 over `"{phi_type}_{value}"`.
fn short_hash(phi_type: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(phi_type.as_bytes());
    hasher.update(b"_");
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();
    hex::encode_upper(&digest[..4])
}
