// crates/policy-mirror-core/src/core/hashing.rs
// ============================================================================
// Module: Policy Mirror Hashing
// Description: SHA-256 digests rendered as lowercase hex.
// Purpose: Derive stable object names from rule content.
// Dependencies: sha2
// ============================================================================

//! ## Overview
//! Object names are content-addressed. This module hashes byte strings with
//! SHA-256 and renders the digest as 64 lowercase hex characters.

// ============================================================================
// SECTION: Imports
// ============================================================================

use sha2::Digest;
use sha2::Sha256;

// ============================================================================
// SECTION: Hashing
// ============================================================================

/// Hashes bytes with SHA-256 and returns the lowercase hex digest.
#[must_use]
pub fn hash_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex_encode(&digest)
}

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::hash_hex;

    #[test]
    fn empty_input_matches_known_digest() {
        assert_eq!(
            hash_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn digest_is_lowercase_hex() {
        let digest = hash_hex(b"p\x1falice");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_digit() || ('a' ..= 'f').contains(&c)));
    }
}
