//! Deterministic cache key derived from `(prompt, model)`.

use sha2::{Digest, Sha256};

/// Byte-equal `(prompt, model)` always yields the same fingerprint, across
/// processes and restarts; no whitespace or case normalization is applied.
pub fn fingerprint(prompt: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(b"\0");
    hasher.update(model.as_bytes());
    format!("{:x}", hasher.finalize())
}
