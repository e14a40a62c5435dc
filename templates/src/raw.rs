//! The raw `getblocktemplate` shape, as handed over by `equisolo-daemon`
//! after JSON decode, plus the coinbase output list attached once the
//! daemon's own `coinbasetxn.data` has been decoded via `decoderawtransaction`.

use equisolo_bitcoin::ScriptPubKeyType;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RawTransaction {
    pub data: String,
    pub hash: String,
    #[serde(default)]
    pub fee: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinbaseTxn {
    pub coinbasevalue: u64,
    pub data: String,
}

/// The fields of a `getblocktemplate` response this system actually reads.
/// Extra daemon fields (`mutable`, `noncerange`, `sigoplimit`, ...) are
/// ignored by `serde` rather than modeled.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTemplate {
    pub previousblockhash: String,
    #[serde(rename = "finalsaplingroothash")]
    pub final_sapling_root_hash: String,
    pub bits: String,
    pub curtime: u32,
    pub height: u32,
    pub version: u32,
    pub target: String,
    pub transactions: Vec<RawTransaction>,
    pub coinbasetxn: CoinbaseTxn,
}

/// One output the daemon's proposed coinbase transaction already carries
/// (community/founders-reward splits the network enforces, plus the
/// miner-reward output the pool will redirect to itself).
#[derive(Debug, Clone)]
pub struct RawVout {
    pub value_zat: i64,
    pub script_type: ScriptPubKeyType,
    /// The hash160 (for `PubkeyHash`/`NullData`) or raw pubkey bytes (for
    /// `Pubkey`) carried by this output's `scriptPubKey`.
    pub payload: Vec<u8>,
}

/// A `RawTemplate` paired with the decoded outputs of its coinbase
/// transaction, ready for [`crate::coinbase::build_coinbase`].
#[derive(Debug, Clone)]
pub struct DecodedTemplate {
    pub raw: RawTemplate,
    pub vouts: Vec<RawVout>,
}
