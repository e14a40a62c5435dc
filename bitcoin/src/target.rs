//! 256-bit target/difficulty arithmetic.
//!
//! The teacher repo never needed a real big-integer type (its
//! `consensus/src/difficulty.rs` treats difficulty bits as a plain `u32`), but
//! this system's difficulty convention is `diff1 / target` over full 256-bit
//! values, so a genuine wide integer is required. `uint` is the crate the
//! domain's own Stratum implementations reach for (see
//! `examples/xertSuns1-braiins/open/protocols/stratum/Cargo.toml`, which pins
//! `uint = "0.5.0"` for exactly this purpose) — adopted here at a current
//! version.

use uint::construct_uint;

construct_uint! {
    /// A 256-bit unsigned integer, used for targets and `diff1` constants.
    pub struct U256(4);
}

/// Parses a 64-hex-char big-endian target/hash into a `U256`.
pub fn u256_from_be_hex(s: &str) -> Option<U256> {
    let bytes = hex::decode(s).ok()?;
    if bytes.len() > 32 {
        return None;
    }
    let mut padded = [0u8; 32];
    padded[32 - bytes.len()..].copy_from_slice(&bytes);
    Some(U256::from_big_endian(&padded))
}

/// Formats a `U256` as a 64-hex-char, left-zero-padded big-endian string.
pub fn u256_to_be_hex(v: U256) -> String {
    let mut bytes = [0u8; 32];
    v.to_big_endian(&mut bytes);
    hex::encode(bytes)
}

/// Lossy conversion to `f64`, used only for difficulty display/ratio math —
/// never for consensus-critical comparisons (those stay in `U256`).
pub fn u256_to_f64(v: U256) -> f64 {
    v.to_string().parse::<f64>().unwrap_or(f64::MAX)
}

/// Inverse of [`u256_to_f64`]: rounds `x` to the nearest non-negative integer
/// and parses it back into a `U256`, saturating at `U256::MAX`.
pub fn f64_to_u256(x: f64) -> U256 {
    if !x.is_finite() || x <= 0.0 {
        return U256::zero();
    }
    if x >= 1.157920892e77 {
        // roughly 2^256
        return U256::max_value();
    }
    U256::from_dec_str(&format!("{:.0}", x)).unwrap_or(U256::max_value())
}

/// Expands a compact "bits" encoding (the Bitcoin `nBits` convention) into a
/// full 256-bit target.
pub fn compact_to_target(bits: u32) -> U256 {
    let exponent = (bits >> 24) as u32;
    let mantissa = bits & 0x007f_ffff;

    if exponent <= 3 {
        U256::from(mantissa >> (8 * (3 - exponent)))
    } else {
        U256::from(mantissa) << (8 * (exponent - 3))
    }
}

/// `diff1 / target`, the difficulty of a target relative to the algorithm's
/// difficulty-1 target.
pub fn difficulty_from_target(diff1: U256, target: U256) -> f64 {
    if target.is_zero() {
        return f64::INFINITY;
    }
    u256_to_f64(diff1) / u256_to_f64(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let mut bytes = [0u8; 32];
        bytes[4] = 0xff;
        bytes[5] = 0xff;
        bytes[31] = 0x07;
        let valid = hex::encode(bytes);
        assert_eq!(valid.len(), 64);

        let v = u256_from_be_hex(&valid).unwrap();
        assert_eq!(u256_to_be_hex(v), valid);
    }

    #[test]
    fn hex_from_be_rejects_oversize_input() {
        let too_long = "00".repeat(33);
        assert!(u256_from_be_hex(&too_long).is_none());
    }

    #[test]
    fn compact_to_target_known_value() {
        // Bitcoin genesis bits: 0x1d00ffff
        let target = compact_to_target(0x1d00ffff);
        let hex_str = u256_to_be_hex(target);
        assert!(hex_str.starts_with("00000000ffff0000"));
    }

    #[test]
    fn f64_u256_roundtrip_small() {
        let v = U256::from(123456789u64);
        let f = u256_to_f64(v);
        assert_eq!(f64_to_u256(f), v);
    }

    #[test]
    fn difficulty_from_target_diff1_over_itself_is_one() {
        let diff1 = U256::from(0x0F0Fu64);
        assert_eq!(difficulty_from_target(diff1, diff1), 1.0);
    }
}
