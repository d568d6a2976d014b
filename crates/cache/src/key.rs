//! Cache key derivation.
//!
//! `sha256(canonical_text ‖ '\0' ‖ join(sorted_witness_paths, '\0'))`, hex
//! rendered. Two queries share a key iff they share canonical text and scan
//! exactly the same files.

use sha2::{Digest, Sha256};

/// Derive the cache key for a canonical query over its witness file set.
pub fn cache_key(canonical_text: &str, witness_paths: &[String]) -> String {
    let mut sorted: Vec<&str> = witness_paths.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(canonical_text.as_bytes());
    hasher.update([0u8]);
    for (i, path) in sorted.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(path.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::cache_key;

    #[test]
    fn witness_order_does_not_matter() {
        let a = cache_key("SELECT 1", &["/d/a".into(), "/d/b".into()]);
        let b = cache_key("SELECT 1", &["/d/b".into(), "/d/a".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn text_and_witness_both_discriminate() {
        let base = cache_key("SELECT 1", &["/d/a".into()]);
        assert_ne!(base, cache_key("SELECT 2", &["/d/a".into()]));
        assert_ne!(base, cache_key("SELECT 1", &["/d/b".into()]));
        assert_ne!(base, cache_key("SELECT 1", &[]));
    }

    #[test]
    fn key_is_hex_sha256() {
        let k = cache_key("SELECT 1", &[]);
        assert_eq!(k.len(), 64);
        assert!(k.bytes().all(|b| b.is_ascii_hexdigit()));
    }
}
