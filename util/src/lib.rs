//! Small helpers shared across the EquiSolo crates: hex/base58 codec and a
//! couple of string sanitizers used by the Stratum authorize path.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UtilError {
    #[error("hex decoding error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("base58 decoding error: {0}")]
    Base58(#[from] bs58::decode::Error),

    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

/// Decodes a hex string to bytes.
pub fn hex_to_bytes(s: &str) -> Result<Vec<u8>, UtilError> {
    Ok(hex::decode(s)?)
}

/// Encodes bytes as a lowercase hex string.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decodes a base58 string (no checksum) to bytes.
pub fn base58_to_bytes(s: &str) -> Result<Vec<u8>, UtilError> {
    Ok(bs58::decode(s).into_vec()?)
}

/// Encodes bytes as a base58 string (no checksum).
pub fn bytes_to_base58(bytes: &[u8]) -> String {
    bs58::encode(bytes).into_string()
}

/// Sanitizes a Stratum worker login of the form `addr.worker` to
/// `[a-zA-Z0-9.]+`, splitting on the first dot. A missing worker component
/// defaults to `"noname"`.
pub fn split_worker_login(raw: &str) -> (String, String) {
    let sanitized: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.')
        .collect();

    match sanitized.split_once('.') {
        Some((addr, worker)) if !worker.is_empty() => (addr.to_string(), worker.to_string()),
        Some((addr, _)) => (addr.to_string(), "noname".to_string()),
        None => (sanitized, "noname".to_string()),
    }
}

/// Left-pads a hex string with `'0'` to `width` characters.
pub fn zero_pad_hex(s: &str, width: usize) -> String {
    if s.len() >= width {
        s.to_string()
    } else {
        format!("{}{}", "0".repeat(width - s.len()), s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let bytes = vec![0xde, 0xad, 0xbe, 0xef];
        let s = bytes_to_hex(&bytes);
        assert_eq!(hex_to_bytes(&s).unwrap(), bytes);
    }

    #[test]
    fn base58_roundtrip() {
        let bytes = vec![0, 1, 2, 3, 4, 5];
        let s = bytes_to_base58(&bytes);
        assert_eq!(base58_to_bytes(&s).unwrap(), bytes);
    }

    #[test]
    fn split_worker_login_with_dot() {
        assert_eq!(
            split_worker_login("RAddress123.rig1"),
            ("RAddress123".to_string(), "rig1".to_string())
        );
    }

    #[test]
    fn split_worker_login_without_dot() {
        assert_eq!(
            split_worker_login("RAddress123"),
            ("RAddress123".to_string(), "noname".to_string())
        );
    }

    #[test]
    fn split_worker_login_strips_illegal_chars() {
        assert_eq!(
            split_worker_login("R$Addr!ess.wor ker"),
            ("RAddress".to_string(), "worker".to_string())
        );
    }

    #[test]
    fn zero_pad_hex_pads_left() {
        assert_eq!(zero_pad_hex("abc", 6), "000abc");
        assert_eq!(zero_pad_hex("abcdef", 6), "abcdef");
    }
}
