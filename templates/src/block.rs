//! The derived, immutable `BlockTemplate` (spec §4.1 DATA MODEL) and the
//! final block-serialization step.

use std::collections::HashSet;

use byteorder::{ByteOrder, LittleEndian};
use equisolo_bitcoin::{
    compact_to_target, difficulty_from_target, encode_varint, reverse_bytes, u256_to_f64, U256,
};
use serde_json::{json, Value};

use crate::coinbase::{build_coinbase, PoolPayout};
use crate::header::{build_header, HEADER_LEN};
use crate::merkle::merkle_root_reversed;
use crate::raw::{DecodedTemplate, RawTemplate};

/// Parses a raw template's `target` field, falling back to expanding `bits`
/// if `target` itself is absent or malformed.
pub fn parse_target(raw: &RawTemplate) -> U256 {
    equisolo_bitcoin::u256_from_be_hex(&raw.target).unwrap_or_else(|| {
        let bits_bytes = hex::decode(&raw.bits).unwrap_or_default();
        let mut bits = [0u8; 4];
        let len = bits_bytes.len().min(4);
        bits[4 - len..].copy_from_slice(&bits_bytes[bits_bytes.len() - len..]);
        compact_to_target(u32::from_be_bytes(bits))
    })
}

/// Raw (display-order) previous-block hash this template was built from, for
/// cheap comparison against an incoming `getblocktemplate` response.
pub fn raw_previousblockhash_hex(reversed: &[u8; 32]) -> String {
    hex::encode(reverse_bytes(reversed))
}

/// Serializes a finished block: `header(140) || solution || varint(txCount)
/// || coinbaseTx || tx1.data || tx2.data || ...`.
pub fn serialize_block(
    header: &[u8; HEADER_LEN],
    solution: &[u8],
    coinbase_tx: &[u8],
    other_tx_data_hex: &[String],
) -> Vec<u8> {
    let tx_count = 1 + other_tx_data_hex.len() as u64;
    let mut out = Vec::with_capacity(
        HEADER_LEN + solution.len() + 9 + coinbase_tx.len() + other_tx_data_hex.len() * 256,
    );
    out.extend_from_slice(header);
    out.extend_from_slice(solution);
    out.extend_from_slice(&encode_varint(tx_count));
    out.extend_from_slice(coinbase_tx);
    for tx_hex in other_tx_data_hex {
        let bytes = hex::decode(tx_hex).expect("serialize_block: invalid tx data hex");
        out.extend_from_slice(&bytes);
    }
    out
}

/// A constructed block template, holding every precomputed binary artifact
/// needed to serve `mining.notify` and to validate submissions against it.
#[derive(Clone)]
pub struct BlockTemplate {
    pub job_id: String,
    pub height: u32,
    pub version: u32,
    pub curtime: u32,
    pub bits: [u8; 4],
    pub previousblockhash_reversed: [u8; 32],
    pub hash_reserved: [u8; 32],
    pub merkle_root_reversed: [u8; 32],
    pub gen_tx: Vec<u8>,
    pub gen_tx_hash: [u8; 32],
    pub target: U256,
    pub difficulty: f64,
    pub other_tx_data: Vec<String>,
    submissions: HashSet<String>,
}

impl BlockTemplate {
    pub fn build(
        job_id: String,
        decoded: &DecodedTemplate,
        pool_payout: &PoolPayout,
        diff1: U256,
    ) -> Self {
        let raw = &decoded.raw;

        let (gen_tx, gen_tx_hash) = build_coinbase(raw.height, &decoded.vouts, pool_payout);

        let tx_hashes: Vec<String> = raw.transactions.iter().map(|t| t.hash.clone()).collect();
        let merkle_root_reversed = merkle_root_reversed(&gen_tx_hash, &tx_hashes);

        let prev_hash_bytes =
            hex::decode(&raw.previousblockhash).expect("invalid previousblockhash hex");
        let mut previousblockhash_reversed = [0u8; 32];
        previousblockhash_reversed.copy_from_slice(&reverse_bytes(&prev_hash_bytes));

        let sapling_root_bytes =
            hex::decode(&raw.final_sapling_root_hash).expect("invalid finalsaplingroothash hex");
        let mut hash_reserved = [0u8; 32];
        hash_reserved.copy_from_slice(&reverse_bytes(&sapling_root_bytes));

        let bits_bytes = hex::decode(&raw.bits).expect("invalid bits hex");
        let mut bits = [0u8; 4];
        bits.copy_from_slice(&bits_bytes);

        let target = parse_target(raw);
        let difficulty = difficulty_from_target(diff1, target);

        BlockTemplate {
            job_id,
            height: raw.height,
            version: raw.version,
            curtime: raw.curtime,
            bits,
            previousblockhash_reversed,
            hash_reserved,
            merkle_root_reversed,
            gen_tx,
            gen_tx_hash,
            target,
            difficulty,
            other_tx_data: raw.transactions.iter().map(|t| t.data.clone()).collect(),
            submissions: HashSet::new(),
        }
    }

    /// `bits`, byte-reversed (the form the header and `mining.notify` use).
    pub fn bits_reversed(&self) -> [u8; 4] {
        let mut out = self.bits;
        out.reverse();
        out
    }

    /// `[jobId, versionLE, prevHashReversed, merkleRootReversed,
    /// hashReserved, curtimeLE, bitsReversed, cleanJobsFlag]`.
    pub fn job_params(&self, clean_jobs: bool) -> Value {
        let mut version_le = [0u8; 4];
        LittleEndian::write_u32(&mut version_le, self.version);
        let mut curtime_le = [0u8; 4];
        LittleEndian::write_u32(&mut curtime_le, self.curtime);

        json!([
            self.job_id,
            hex::encode(version_le),
            hex::encode(self.previousblockhash_reversed),
            hex::encode(self.merkle_root_reversed),
            hex::encode(self.hash_reserved),
            hex::encode(curtime_le),
            hex::encode(self.bits_reversed()),
            clean_jobs,
        ])
    }

    /// Builds the 140-byte header for a submitted `(nTime, nonce)` pair.
    pub fn build_header(&self, n_time: u32, nonce: &[u8; 32]) -> [u8; 140] {
        build_header(
            self.version,
            &self.previousblockhash_reversed,
            &self.merkle_root_reversed,
            &self.hash_reserved,
            n_time,
            &self.bits_reversed(),
            nonce,
        )
    }

    /// Serializes a full block from a header and its matching solution.
    pub fn serialize_block(&self, header: &[u8; 140], solution: &[u8]) -> Vec<u8> {
        serialize_block(header, solution, &self.gen_tx, &self.other_tx_data)
    }

    /// `registerSubmit`: lowercases `header ‖ soln`, checks/inserts it into
    /// the dedup set, returns whether it was newly inserted.
    pub fn register_submit(&mut self, header_hex: &str, soln_hex: &str) -> bool {
        let key = format!("{}{}", header_hex, soln_hex).to_lowercase();
        self.submissions.insert(key)
    }

    pub fn difficulty_as_f64(&self) -> f64 {
        u256_to_f64(self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::{CoinbaseTxn, RawTemplate, RawVout};
    use equisolo_bitcoin::ScriptPubKeyType;

    fn sample_decoded() -> DecodedTemplate {
        DecodedTemplate {
            raw: RawTemplate {
                previousblockhash: "00".repeat(32),
                final_sapling_root_hash: "11".repeat(32),
                bits: "1f0ffff0".to_string(),
                curtime: 1_700_000_000,
                height: 12345,
                version: 4,
                target: "0f".repeat(32),
                transactions: vec![],
                coinbasetxn: CoinbaseTxn {
                    coinbasevalue: 300_000_000,
                    data: String::new(),
                },
            },
            vouts: vec![RawVout {
                value_zat: 300_000_000,
                script_type: ScriptPubKeyType::PubkeyHash,
                payload: vec![0xAB; 20],
            }],
        }
    }

    #[test]
    fn build_populates_gen_tx_and_merkle_root() {
        let decoded = sample_decoded();
        let pool_payout = PoolPayout {
            script_type: ScriptPubKeyType::PubkeyHash,
            payload: vec![0xCD; 20],
        };
        let template = BlockTemplate::build(
            "cccc0001".to_string(),
            &decoded,
            &pool_payout,
            U256::from_big_endian(&[0x0F; 32]),
        );
        assert!(!template.gen_tx.is_empty());
        assert_eq!(template.merkle_root_reversed.len(), 32);
        assert!(template.difficulty > 0.0);
    }

    #[test]
    fn register_submit_detects_duplicates() {
        let decoded = sample_decoded();
        let pool_payout = PoolPayout {
            script_type: ScriptPubKeyType::PubkeyHash,
            payload: vec![0xCD; 20],
        };
        let mut template = BlockTemplate::build(
            "cccc0001".to_string(),
            &decoded,
            &pool_payout,
            U256::from_big_endian(&[0x0F; 32]),
        );

        assert!(template.register_submit("ABCD", "1234"));
        assert!(!template.register_submit("abcd", "1234"));
    }

    #[test]
    fn job_params_has_eight_elements() {
        let decoded = sample_decoded();
        let pool_payout = PoolPayout {
            script_type: ScriptPubKeyType::PubkeyHash,
            payload: vec![0xCD; 20],
        };
        let template = BlockTemplate::build(
            "cccc0001".to_string(),
            &decoded,
            &pool_payout,
            U256::from_big_endian(&[0x0F; 32]),
        );
        let params = template.job_params(true);
        assert_eq!(params.as_array().unwrap().len(), 8);
        assert_eq!(params[7], true);
    }
}
