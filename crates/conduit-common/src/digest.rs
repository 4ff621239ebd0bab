//! Stable content digests
//!
//! SHA-256 is used rather than `std::hash` so that digests and shard
//! assignments agree across processes and releases.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `data`
pub fn content_digest(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

/// Map `key` onto one of `buckets` shards
///
/// Returns 0 when `buckets` is 0 so callers never divide by zero.
pub fn stable_shard(key: &str, buckets: u32) -> u32 {
    if buckets == 0 {
        return 0;
    }
    let hash = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash[..8]);
    (u64::from_be_bytes(prefix) % u64::from(buckets)) as u32
}
