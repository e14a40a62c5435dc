//! Converts a daemon's `getblocktemplate` response into a fully constructed,
//! immutable `BlockTemplate`: coinbase transaction, Merkle root, 140-byte
//! header, and final block serialization.

pub mod block;
pub mod coinbase;
pub mod header;
pub mod merkle;
pub mod raw;

pub use block::{parse_target, raw_previousblockhash_hex, serialize_block, BlockTemplate};
pub use coinbase::{build_coinbase, PoolPayout};
pub use header::{build_header, HEADER_LEN, NONCE_LEN};
pub use merkle::merkle_root_reversed;
pub use raw::{CoinbaseTxn, DecodedTemplate, RawTemplate, RawTransaction, RawVout};
