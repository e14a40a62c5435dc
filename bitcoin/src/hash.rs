//! Hashing and endianness helpers used throughout the template builder.
//!
//! Grounded on `crypto/src/lib.rs`'s SHA-256 use in the teacher repo, extended
//! to the double-SHA-256 ("SHA256d") convention Bitcoin-family chains use for
//! block and transaction hashes.

use sha2::{Digest, Sha256};

/// Double SHA-256, as used for transaction hashes, the coinbase hash, and the
/// Merkle tree.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let once = Sha256::digest(data);
    let twice = Sha256::digest(once);
    twice.into()
}

/// Reverses a byte slice, producing a new `Vec<u8>`. Used to flip between a
/// hash's display order (big-endian, as daemons print it) and its canonical
/// wire order (little-endian).
pub fn reverse_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut v = bytes.to_vec();
    v.reverse();
    v
}

/// Reverses a hex string byte-wise (not character-wise): decodes, reverses
/// the bytes, and re-encodes. Panics if `hex_str` is not valid hex — callers
/// are expected to validate RPC-sourced hex before reaching here.
pub fn reverse_hex(hex_str: &str) -> String {
    let bytes = hex::decode(hex_str).expect("reverse_hex: invalid hex input");
    hex::encode(reverse_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_hex_is_involution() {
        let cases = ["", "ab", "deadbeef", "0011223344556677"];
        for c in cases {
            assert_eq!(reverse_hex(&reverse_hex(c)), c);
        }
    }

    #[test]
    fn reverse_bytes_empty() {
        assert_eq!(reverse_bytes(&[]), Vec::<u8>::new());
    }

    #[test]
    fn sha256d_matches_known_vector() {
        let digest = sha256d(b"");
        assert_eq!(
            hex::encode(digest),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }
}
