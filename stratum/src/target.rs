//! Target expression for `mining.set_target` (spec §4.4, "Target
//! expression").

use equisolo_bitcoin::{algorithm_by_tag, f64_to_u256, u256_to_be_hex, u256_to_f64, U256};

/// `algos.komodo.diff1 / (difficulty / scalingFactor)`, left-zero-padded to
/// 64 hex chars, where `scalingFactor = algos.zcash.diff1 / algos.komodo.diff1`.
///
/// `difficulty <= 0.0` (or non-finite) is treated as "as easy as possible":
/// the maximum 256-bit target, rather than the `f64_to_u256` zero fallback
/// that an infinite target would otherwise saturate to.
pub fn target_hex_for_difficulty(difficulty: f64) -> String {
    let komodo = algorithm_by_tag("komodo").expect("komodo algorithm is always registered");
    let scaling_factor = equisolo_bitcoin::algos::scaling_factor();

    let scaled_diff = difficulty / scaling_factor;
    if !scaled_diff.is_finite() || scaled_diff <= 0.0 {
        return u256_to_be_hex(U256::max_value());
    }

    let target_f = u256_to_f64(komodo.diff1) / scaled_diff;
    let target = f64_to_u256(target_f);
    u256_to_be_hex(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use equisolo_bitcoin::u256_from_be_hex;

    #[test]
    fn scenario_s5_target_scaling_at_difficulty_one() {
        let komodo = algorithm_by_tag("komodo").unwrap();
        let scaling_factor = equisolo_bitcoin::algos::scaling_factor();
        let expected = u256_to_f64(komodo.diff1) * scaling_factor;

        let hex = target_hex_for_difficulty(1.0);
        let got = u256_from_be_hex(&hex).unwrap();
        let got_f = u256_to_f64(got);

        // f64 round-trip through a 256-bit integer loses precision; compare
        // within a tight relative tolerance rather than bit-for-bit.
        let relative_error = ((got_f - expected) / expected).abs();
        assert!(relative_error < 1e-9, "relative error {relative_error}");
    }

    #[test]
    fn target_hex_is_always_64_chars() {
        assert_eq!(target_hex_for_difficulty(1.0).len(), 64);
        assert_eq!(target_hex_for_difficulty(1_000_000.0).len(), 64);
        assert_eq!(target_hex_for_difficulty(0.0).len(), 64);
    }

    #[test]
    fn zero_difficulty_yields_max_target() {
        let hex = target_hex_for_difficulty(0.0);
        assert_eq!(hex, "f".repeat(64));
    }
}
