//! Token generation for sessions, uploads and stored files.

use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Generate an opaque token from a seed, a timestamp and 8 random bytes.
/// Format: `prefix` + "-" + 16 hex chars of SHA256(seed + timestamp + random)
pub fn generate_token(prefix: &str, seed: &str, at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(at.timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
    hasher.update(rand::rng().random::<[u8; 8]>());
    let hash = hasher.finalize();
    format!("{}-{}", prefix, hex_prefix(&hash, 8))
}

/// Lowercase hex SHA-256 digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_prefix(&hasher.finalize(), 32)
}

/// Finish a running hasher into lowercase hex.
pub fn finish_hex(hasher: Sha256) -> String {
    hex_prefix(&hasher.finalize(), 32)
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes.iter().take(len).map(|b| format!("{:02x}", b)).collect()
}
