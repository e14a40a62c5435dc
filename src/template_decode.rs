//! Converts a daemon's `getblocktemplate` JSON response into a
//! [`DecodedTemplate`], decoding the proposed coinbase transaction's outputs
//! via `decoderawtransaction` (spec §4.7 step 7, §6 daemon RPC methods).

use equisolo_bitcoin::ScriptPubKeyType;
use equisolo_daemon::DaemonClient;
use equisolo_templates::{DecodedTemplate, RawTemplate, RawVout};
use serde_json::{json, Value};

use crate::errors::PoolError;

/// One output the daemon's proposed coinbase already carries. Extracts the
/// hash160/pubkey payload out of its `scriptPubKey.hex`, the inverse of
/// `equisolo_bitcoin::compile_output_script`.
fn decode_vout(entry: &Value) -> Option<RawVout> {
    let value_btc = entry.get("value")?.as_f64()?;
    let value_zat = (value_btc * 1e8).round() as i64;

    let script_pub_key = entry.get("scriptPubKey")?;
    let kind = ScriptPubKeyType::from_daemon_str(script_pub_key.get("type")?.as_str()?);
    let script_bytes = hex::decode(script_pub_key.get("hex")?.as_str()?).ok()?;

    let payload = match kind {
        ScriptPubKeyType::Pubkey => {
            let len = *script_bytes.first()? as usize;
            script_bytes.get(1..1 + len)?.to_vec()
        }
        ScriptPubKeyType::PubkeyHash | ScriptPubKeyType::NullData => {
            let len = *script_bytes.get(2)? as usize;
            script_bytes.get(3..3 + len)?.to_vec()
        }
    };

    Some(RawVout {
        value_zat,
        script_type: kind,
        payload,
    })
}

/// Parses `template_json` into a `RawTemplate`, then calls
/// `decoderawtransaction` on its `coinbasetxn.data` to recover the output
/// list `equisolo_templates::build_coinbase` needs.
pub async fn decode_template(
    daemon: &DaemonClient,
    template_json: Value,
) -> Result<DecodedTemplate, PoolError> {
    let raw: RawTemplate = serde_json::from_value(template_json)
        .map_err(|e| PoolError::TemplateMissingFields(e.to_string()))?;

    let decoded_tx = daemon
        .cmd("decoderawtransaction", vec![json!(raw.coinbasetxn.data)])
        .await
        .into_iter()
        .next()
        .ok_or(PoolError::NoDaemonOnline)??;

    let vouts: Vec<RawVout> = decoded_tx
        .get("vout")
        .and_then(Value::as_array)
        .ok_or_else(|| PoolError::TemplateMissingFields("decoderawtransaction: missing vout".to_string()))?
        .iter()
        .filter_map(decode_vout)
        .collect();

    Ok(DecodedTemplate { raw, vouts })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_vout_extracts_hash160_from_pubkeyhash_script() {
        let entry = json!({
            "value": 3.0,
            "scriptPubKey": {
                "type": "pubkeyhash",
                "hex": format!("76a914{}88ac", "ab".repeat(20)),
            }
        });
        let vout = decode_vout(&entry).unwrap();
        assert_eq!(vout.value_zat, 300_000_000);
        assert_eq!(vout.payload, vec![0xAB; 20]);
        assert_eq!(vout.script_type, ScriptPubKeyType::PubkeyHash);
    }

    #[test]
    fn decode_vout_extracts_raw_pubkey_from_pubkey_script() {
        let pubkey_hex = "02".to_string() + &"cd".repeat(32);
        let entry = json!({
            "value": 1.5,
            "scriptPubKey": {
                "type": "pubkey",
                "hex": format!("21{pubkey_hex}ac"),
            }
        });
        let vout = decode_vout(&entry).unwrap();
        assert_eq!(vout.script_type, ScriptPubKeyType::Pubkey);
        assert_eq!(vout.payload.len(), 33);
    }
}
