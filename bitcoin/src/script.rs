//! Coinbase height serialization (BIP34) and output script compilation.
//!
//! Grounded on the BIP34 height-prefix convention the teacher's `core` crate
//! used to hand-roll for its own coinbase builder; the op-code bytes below
//! (`OP_DUP`, `OP_HASH160`, `OP_EQUALVERIFY`, `OP_CHECKSIG`) are the same
//! constants Bitcoin-lineage script compilers use everywhere in the pack.

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;
const OP_RETURN: u8 = 0x6a;

/// Number of bytes needed to hold `n` in minimal little-endian form (no
/// leading zero byte, `0` itself takes zero bytes here).
fn minimal_le_byte_count(mut n: u64) -> usize {
    let mut count = 0;
    while n > 0 {
        count += 1;
        n >>= 8;
    }
    count
}

/// Serializes a block height per this system's BIP34 convention: a length
/// byte giving the number of bytes needed to encode `height << 1` in minimal
/// form, followed by `height` itself as little-endian bytes padded out to
/// that length, followed by a single `0x00` terminator.
///
/// The doubled value is used only to size the length prefix (matching the
/// sign-safe `CScriptNum` width a full node would compute); the bytes
/// actually pushed are `height`, not `height << 1`.
fn bip34_height_bytes(height: u32) -> Vec<u8> {
    let width = minimal_le_byte_count((height as u64) << 1).max(1);
    let full = (height as u64).to_le_bytes();
    full[..width].to_vec()
}

/// Builds the scriptSig prefix a coinbase input must start with: the BIP34
/// height push, followed by the ASCII-hex bytes of the decimal height
/// (a vanity/debugging tag many pool implementations append).
pub fn coinbase_height_script(height: u32) -> Vec<u8> {
    let height_bytes = bip34_height_bytes(height);
    let mut script = Vec::with_capacity(height_bytes.len() + 2);
    script.push(height_bytes.len() as u8);
    script.extend_from_slice(&height_bytes);
    script.push(0x00);

    let decimal = height.to_string();
    script.extend_from_slice(decimal.as_bytes());
    script
}

/// The `scriptPubKey` shapes a daemon's `vouts` entries can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptPubKeyType {
    Pubkey,
    PubkeyHash,
    NullData,
}

impl ScriptPubKeyType {
    pub fn from_daemon_str(s: &str) -> Self {
        match s {
            "pubkey" => ScriptPubKeyType::Pubkey,
            "nulldata" => ScriptPubKeyType::NullData,
            _ => ScriptPubKeyType::PubkeyHash,
        }
    }
}

/// Compiles an output script for one `vouts` entry.
///
/// - `Pubkey`: `<pubkey> OP_CHECKSIG`, where `payload` is the raw (already
///   decoded) public key bytes.
/// - `PubkeyHash` / `NullData` / anything else: the classic P2PKH template,
///   `OP_DUP OP_HASH160 <hash> OP_EQUALVERIFY OP_CHECKSIG`, where `payload`
///   is the 20-byte hash.
pub fn compile_output_script(kind: ScriptPubKeyType, payload: &[u8]) -> Vec<u8> {
    match kind {
        ScriptPubKeyType::Pubkey => {
            let mut out = Vec::with_capacity(payload.len() + 2);
            out.push(payload.len() as u8);
            out.extend_from_slice(payload);
            out.push(OP_CHECKSIG);
            out
        }
        ScriptPubKeyType::PubkeyHash | ScriptPubKeyType::NullData => {
            let mut out = Vec::with_capacity(payload.len() + 5);
            out.push(OP_DUP);
            out.push(OP_HASH160);
            out.push(payload.len() as u8);
            out.extend_from_slice(payload);
            out.push(OP_EQUALVERIFY);
            out.push(OP_CHECKSIG);
            out
        }
    }
}

/// A zero-value `OP_RETURN <data>` script, used only in tests to exercise the
/// "non-zero valueZat" filter the template builder applies upstream.
pub fn op_return_script(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);
    out.push(OP_RETURN);
    out.push(data.len() as u8);
    out.extend_from_slice(data);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_coinbase_height_99() {
        // spec scenario S1: height 99 -> `01 63 00` then hex("99") = "3939"
        let script = coinbase_height_script(99);
        assert_eq!(script, vec![0x01, 0x63, 0x00, b'3', b'9']);
        assert_eq!(hex::encode(&script), "0163003939");
    }

    #[test]
    fn bip34_height_zero() {
        assert_eq!(bip34_height_bytes(0), vec![0x00]);
    }

    #[test]
    fn bip34_height_two_bytes() {
        // 0x0163 = 355 needs 2 bytes, little-endian: 63 01
        assert_eq!(bip34_height_bytes(355), vec![0x63, 0x01]);
    }

    #[test]
    fn bip34_height_doubled_width_edge_case() {
        // height=128 fits a single byte on its own, but height<<1=256
        // needs two bytes to stay minimal — the length prefix must widen
        // even though the pushed value itself would fit in one byte.
        let script = coinbase_height_script(128);
        assert_eq!(script[0], 0x02);
        assert_eq!(&script[1..3], &[0x80, 0x00]);
    }

    #[test]
    fn pubkeyhash_output_script_shape() {
        let hash = [0xAAu8; 20];
        let script = compile_output_script(ScriptPubKeyType::PubkeyHash, &hash);
        assert_eq!(script[0], OP_DUP);
        assert_eq!(script[1], OP_HASH160);
        assert_eq!(script[2], 20);
        assert_eq!(&script[3..23], &hash[..]);
        assert_eq!(script[23], OP_EQUALVERIFY);
        assert_eq!(script[24], OP_CHECKSIG);
    }

    #[test]
    fn pubkey_output_script_shape() {
        let pubkey = [0x02u8; 33];
        let script = compile_output_script(ScriptPubKeyType::Pubkey, &pubkey);
        assert_eq!(script[0], 33);
        assert_eq!(&script[1..34], &pubkey[..]);
        assert_eq!(script[34], OP_CHECKSIG);
    }

    #[test]
    fn from_daemon_str_defaults_to_pubkeyhash() {
        assert_eq!(
            ScriptPubKeyType::from_daemon_str("nulldata"),
            ScriptPubKeyType::NullData
        );
        assert_eq!(
            ScriptPubKeyType::from_daemon_str("anything-else"),
            ScriptPubKeyType::PubkeyHash
        );
    }
}
