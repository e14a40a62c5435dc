//! Bitcoin-lineage binary primitives shared by the template builder and the
//! P2P client: hashing, varints, 256-bit targets, script compilation, and the
//! per-algorithm `diff1` table.

pub mod algos;
pub mod hash;
pub mod script;
pub mod target;
pub mod varint;

pub use algos::{AlgorithmParams, by_tag as algorithm_by_tag};
pub use hash::{reverse_bytes, reverse_hex, sha256d};
pub use script::{coinbase_height_script, compile_output_script, ScriptPubKeyType};
pub use target::{
    compact_to_target, difficulty_from_target, f64_to_u256, u256_from_be_hex, u256_to_be_hex,
    u256_to_f64, U256,
};
pub use varint::{decode_varint, encode_varint};
