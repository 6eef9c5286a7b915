//! Content hashing for deduplication and integrity tracking.

use sha2::{Digest, Sha256};

/// Computes the SHA-256 digest of the given bytes as lowercase hex.
///
/// Deterministic and pure; used as the dedup key for uploaded packages.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
