//! SHA256 hashing for content identity.
//!
//! Used for computing content-based identity of uploads and cached proxied
//! results. This is *not* an access-control primitive: a caller presenting
//! a hash that matches stored bytes has proven nothing about authorization.
//! See [`crate::tokens`] for the keyed equivalent.

use sha2::{Digest, Sha256};

/// Compute SHA256 hash of data.
pub fn sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute a cache key for a proxied fleet-mode result, from the node that
/// produced it and the relative path it reported. Two different nodes
/// reporting the same relative path must not collide.
pub fn result_cache_key(node_id: &str, relative_path: &str) -> String {
    const SEP: u8 = 0x1f;
    let mut hasher = Sha256::new();
    hasher.update(node_id.as_bytes());
    hasher.update([SEP]);
    hasher.update(relative_path.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256() {
        let data = b"hello world";
        let hash = sha256(data);
        assert_eq!(hash.len(), 64); // SHA256 is 32 bytes = 64 hex chars
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn result_cache_key_is_stable_and_distinguishes_nodes() {
        let k1 = result_cache_key("gpu-01", "2025/07/26/out.png");
        let k2 = result_cache_key("gpu-01", "2025/07/26/out.png");
        assert_eq!(k1, k2);

        let k3 = result_cache_key("gpu-02", "2025/07/26/out.png");
        assert_ne!(k1, k3);
    }
}
