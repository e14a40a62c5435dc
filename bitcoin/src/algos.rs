//! The algorithm table (§3 DATA MODEL): maps an algorithm tag to its
//! `(diff1, minDiff)` pair. This used to be a process-wide global in the
//! reference implementation; here it is an explicit, immutable value passed
//! down from the pool orchestrator (see DESIGN NOTES, "Global mutable
//! singletons").

use crate::target::U256;

/// Difficulty-1 target and floor difficulty for one PoW algorithm.
#[derive(Debug, Clone, Copy)]
pub struct AlgorithmParams {
    pub diff1: U256,
    pub min_diff: U256,
}

/// Komodo's Equihash variant: `diff1 = 0x0F0F..0F`, all 32 bytes `0x0F`.
pub fn komodo() -> AlgorithmParams {
    AlgorithmParams {
        diff1: U256::from_big_endian(&[0x0F; 32]),
        min_diff: U256::one(),
    }
}

/// Zcash's Equihash variant: `diff1 = 0x0007FF..FF` (bytes 0,1 are `0x00,
/// 0x07`, the remaining 30 bytes are `0xFF`).
pub fn zcash() -> AlgorithmParams {
    let mut bytes = [0xFFu8; 32];
    bytes[0] = 0x00;
    bytes[1] = 0x07;
    AlgorithmParams {
        diff1: U256::from_big_endian(&bytes),
        min_diff: U256::one(),
    }
}

/// Looks up an algorithm by its coin-config tag (`"equihash"` covers both
/// lineages; the specific `diff1` used for `mining.set_target` scaling is
/// always Komodo's, scaled against Zcash's — see `target::scaling_factor`).
pub fn by_tag(tag: &str) -> Option<AlgorithmParams> {
    match tag {
        "komodo" => Some(komodo()),
        "zcash" | "equihash" => Some(zcash()),
        _ => None,
    }
}

/// `zcash.diff1 / komodo.diff1`, the constant used to rescale a miner's
/// Equihash-style difficulty into Komodo's internal difficulty-1 unit space
/// when composing `mining.set_target` (spec §4.4, "Target expression").
pub fn scaling_factor() -> f64 {
    crate::target::u256_to_f64(zcash().diff1) / crate::target::u256_to_f64(komodo().diff1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn komodo_diff1_is_all_0f() {
        let mut bytes = [0u8; 32];
        komodo().diff1.to_big_endian(&mut bytes);
        assert!(bytes.iter().all(|&b| b == 0x0F));
    }

    #[test]
    fn zcash_diff1_prefix() {
        let mut bytes = [0u8; 32];
        zcash().diff1.to_big_endian(&mut bytes);
        assert_eq!(&bytes[0..2], &[0x00, 0x07]);
        assert!(bytes[2..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn scaling_factor_is_positive_and_greater_than_one() {
        // zcash's diff1 target is numerically larger than komodo's, so the
        // ratio of targets is > 1.
        assert!(scaling_factor() > 1.0);
    }
}
