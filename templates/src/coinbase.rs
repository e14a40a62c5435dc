//! Coinbase transaction construction (spec §4.2, "Coinbase construction").
//!
//! Builds a Zcash Sapling-version coinbase transaction: one null-prevout
//! input whose scriptSig carries the BIP34 height push, and the daemon's
//! proposed outputs with the first one redirected to the pool.

use byteorder::{LittleEndian, WriteBytesExt};
use equisolo_bitcoin::{coinbase_height_script, compile_output_script, sha256d, ScriptPubKeyType};

use crate::raw::RawVout;

/// `fOverwintered | version`, as Zcash serializes the first 4 header bytes.
const ZCASH_SAPLING_VERSION: u32 = 4;
const ZCASH_OVERWINTERED_FLAG: u32 = 1 << 31;
/// The Sapling consensus branch's version group id.
const ZCASH_SAPLING_VERSION_GROUP_ID: u32 = 0x892F_2085;

const NULL_PREVOUT_HASH: [u8; 32] = [0u8; 32];
const PREVOUT_INDEX: u32 = 0xFFFF_FFFF;
const SEQUENCE: u32 = 0xFFFF_FFFF;

/// Where the pool wants its own share of the coinbase value to land.
pub struct PoolPayout {
    pub script_type: ScriptPubKeyType,
    pub payload: Vec<u8>,
}

fn write_varint(buf: &mut Vec<u8>, n: u64) {
    buf.extend_from_slice(&equisolo_bitcoin::encode_varint(n));
}

/// Builds the coinbase transaction for `height`, substituting `pool_payout`
/// into the first output with non-zero value and compiling the remaining
/// daemon-proposed outputs verbatim.
///
/// Returns `(tx_bytes, tx_hash)` where `tx_hash` is `SHA256d` of `tx_bytes`,
/// in the same wire/internal byte order `sha256d` always produces (not the
/// daemon's reversed display order, so callers must not byte-reverse it
/// again before using it as a Merkle leaf).
pub fn build_coinbase(height: u32, vouts: &[RawVout], pool_payout: &PoolPayout) -> (Vec<u8>, [u8; 32]) {
    let mut tx = Vec::new();

    let header = ZCASH_OVERWINTERED_FLAG | ZCASH_SAPLING_VERSION;
    tx.write_u32::<LittleEndian>(header).unwrap();
    tx.write_u32::<LittleEndian>(ZCASH_SAPLING_VERSION_GROUP_ID).unwrap();

    // one input
    write_varint(&mut tx, 1);
    tx.extend_from_slice(&NULL_PREVOUT_HASH);
    tx.write_u32::<LittleEndian>(PREVOUT_INDEX).unwrap();
    let script_sig = coinbase_height_script(height);
    write_varint(&mut tx, script_sig.len() as u64);
    tx.extend_from_slice(&script_sig);
    tx.write_u32::<LittleEndian>(SEQUENCE).unwrap();

    // outputs: non-zero-value vouts only, first one redirected to the pool
    let active: Vec<&RawVout> = vouts.iter().filter(|v| v.value_zat != 0).collect();
    write_varint(&mut tx, active.len() as u64);
    for (i, vout) in active.iter().enumerate() {
        tx.write_i64::<LittleEndian>(vout.value_zat).unwrap();
        let script = if i == 0 {
            compile_output_script(pool_payout.script_type, &pool_payout.payload)
        } else {
            compile_output_script(vout.script_type, &vout.payload)
        };
        write_varint(&mut tx, script.len() as u64);
        tx.extend_from_slice(&script);
    }

    // locktime, expiry height
    tx.write_u32::<LittleEndian>(0).unwrap();
    tx.write_u32::<LittleEndian>(0).unwrap();

    // Sapling shielded value balance and empty shielded pools
    tx.write_i64::<LittleEndian>(0).unwrap();
    write_varint(&mut tx, 0); // nShieldedSpend
    write_varint(&mut tx, 0); // nShieldedOutput
    write_varint(&mut tx, 0); // nJoinSplit

    let hash = sha256d(&tx);
    (tx, hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_coinbase_height_99_p2pkh_single_output() {
        let vouts = vec![RawVout {
            value_zat: 300_000_000,
            script_type: ScriptPubKeyType::PubkeyHash,
            payload: vec![0xAB; 20],
        }];
        let pool_payout = PoolPayout {
            script_type: ScriptPubKeyType::PubkeyHash,
            payload: vec![0xCD; 20],
        };

        let (tx, _hash) = build_coinbase(99, &vouts, &pool_payout);

        // header + version group id
        assert_eq!(&tx[0..4], &(ZCASH_OVERWINTERED_FLAG | ZCASH_SAPLING_VERSION).to_le_bytes());
        assert_eq!(&tx[4..8], &ZCASH_SAPLING_VERSION_GROUP_ID.to_le_bytes());

        // vin count = 1, null prevout hash, index, scriptSig
        assert_eq!(tx[8], 1);
        let prevout_hash = &tx[9..41];
        assert!(prevout_hash.iter().all(|&b| b == 0));
        assert_eq!(&tx[41..45], &PREVOUT_INDEX.to_le_bytes());
        // scriptSig length byte (5) then 01 63 00 39 39
        assert_eq!(tx[45], 5);
        assert_eq!(&tx[46..51], &[0x01, 0x63, 0x00, b'9', b'9']);

        // sequence follows scriptSig
        assert_eq!(&tx[51..55], &SEQUENCE.to_le_bytes());

        // vout count = 1
        assert_eq!(tx[55], 1);
        // amount (8 bytes LE)
        assert_eq!(&tx[56..64], &300_000_000i64.to_le_bytes());
        // scriptPubKey: OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG => 25 bytes
        assert_eq!(tx[64], 25);
        assert_eq!(tx[65], 0x76);
        assert_eq!(tx[66], 0xa9);
        assert_eq!(tx[67], 20);
        assert_eq!(&tx[68..88], &[0xCD; 20][..]);
        assert_eq!(tx[88], 0x88);
        assert_eq!(tx[89], 0xac);
    }

    #[test]
    fn zero_value_vouts_are_dropped() {
        let vouts = vec![
            RawVout {
                value_zat: 0,
                script_type: ScriptPubKeyType::NullData,
                payload: vec![],
            },
            RawVout {
                value_zat: 500,
                script_type: ScriptPubKeyType::PubkeyHash,
                payload: vec![0x11; 20],
            },
        ];
        let pool_payout = PoolPayout {
            script_type: ScriptPubKeyType::PubkeyHash,
            payload: vec![0x22; 20],
        };
        let (tx, _) = build_coinbase(1, &vouts, &pool_payout);
        // vout count should be 1, not 2
        let vout_count_offset = 9 + 32 + 4 + 1 + 5 + 4; // after vin
        assert_eq!(tx[vout_count_offset], 1);
    }
}
