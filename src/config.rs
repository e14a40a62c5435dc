//! JSON configuration document (spec §6, EXTERNAL INTERFACES). Loaded with
//! `serde_json` rather than the teacher's `config` crate: the teacher never
//! actually wires `config` to anything beyond a `// TODO` comment, so this
//! workspace follows the JSON-everywhere convention the rest of its crates
//! already use for daemon RPC and Stratum wire shapes instead.

use std::collections::HashMap;
use std::time::Duration;

use equisolo_bitcoin::ScriptPubKeyType;
use equisolo_daemon::DaemonInstance;
use equisolo_templates::PoolPayout;
use equisolo_vardiff::VarDiffConfig;
use serde::Deserialize;

use crate::errors::PoolError;

#[derive(Debug, Clone, Deserialize)]
pub struct CoinConfig {
    pub name: String,
    pub symbol: String,
    #[serde(rename = "peerMagic")]
    pub peer_magic: String,
    #[serde(rename = "peerMagicTestnet", default)]
    pub peer_magic_testnet: String,
    /// Filled in by the pool at runtime from `getinfo.staked`; always empty
    /// on the way in.
    #[serde(default)]
    pub reward: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VarDiffSettings {
    #[serde(rename = "targetTime")]
    pub target_time: f64,
    #[serde(rename = "retargetTime")]
    pub retarget_time: f64,
    #[serde(rename = "variancePercent")]
    pub variance_percent: f64,
    #[serde(rename = "minDiff")]
    pub min_diff: f64,
    #[serde(rename = "maxDiff")]
    pub max_diff: f64,
}

impl VarDiffSettings {
    pub fn to_vardiff_config(&self) -> VarDiffConfig {
        VarDiffConfig {
            target_time: Duration::from_secs_f64(self.target_time.max(1.0)),
            retarget_time: Duration::from_secs_f64(self.retarget_time.max(1.0)),
            variance_percent: self.variance_percent,
            min_diff: self.min_diff,
            max_diff: self.max_diff,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortSettings {
    pub diff: f64,
    #[serde(rename = "varDiff", default)]
    pub var_diff: Option<VarDiffSettings>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct P2pConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default, rename = "disableTransactions")]
    pub disable_transactions: bool,
}

/// Log-sink toggles (spec §6): carried through so a future external log sink
/// can read the operator's intent, even though the sink itself is out of
/// scope (spec §1).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LogToggles {
    #[serde(default, rename = "printShares")]
    pub print_shares: bool,
    #[serde(default, rename = "printHighShares")]
    pub print_high_shares: bool,
    #[serde(default, rename = "printCurrentDiff")]
    pub print_current_diff: bool,
    #[serde(default, rename = "printNewWork")]
    pub print_new_work: bool,
    #[serde(default, rename = "printNethash")]
    pub print_nethash: bool,
    #[serde(default, rename = "printVarDiffAdjust")]
    pub print_vardiff_adjust: bool,
}

fn default_block_refresh_interval() -> i64 {
    1000
}

fn default_job_rebroadcast_timeout() -> u64 {
    55
}

fn default_connection_timeout() -> u64 {
    600
}

/// `minDiffAdjust` is documented as a "boolean-ish string" (spec §6):
/// accepts a real JSON boolean or a string like `"true"`/`"1"`.
fn deserialize_bool_ish<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Bool(b) => Ok(b),
        serde_json::Value::String(s) => Ok(matches!(s.as_str(), "true" | "1" | "yes")),
        serde_json::Value::Null => Ok(false),
        other => Err(D::Error::custom(format!("expected bool-ish value, got {other}"))),
    }
}

fn default_min_diff_adjust() -> bool {
    false
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub coin: CoinConfig,
    pub address: String,
    #[serde(default)]
    pub pubkey: Option<String>,
    pub daemons: Vec<DaemonInstance>,
    pub ports: HashMap<String, PortSettings>,
    #[serde(default)]
    pub p2p: P2pConfig,
    #[serde(default = "default_block_refresh_interval", rename = "blockRefreshInterval")]
    pub block_refresh_interval: i64,
    #[serde(default = "default_job_rebroadcast_timeout", rename = "jobRebroadcastTimeout")]
    pub job_rebroadcast_timeout: u64,
    #[serde(default = "default_connection_timeout", rename = "connectionTimeout")]
    pub connection_timeout: u64,
    #[serde(
        default = "default_min_diff_adjust",
        rename = "minDiffAdjust",
        deserialize_with = "deserialize_bool_ish"
    )]
    pub min_diff_adjust: bool,
    #[serde(default, flatten)]
    pub log_toggles: LogToggles,
    #[serde(default, rename = "tcpProxyProtocol")]
    pub tcp_proxy_protocol: bool,
}

impl PoolConfig {
    /// Structured startup validation (spec §7, "Startup-phase errors...are
    /// fatal"): daemon list non-empty, address decodes to 25/26 bytes, at
    /// least one port configured.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.daemons.is_empty() {
            return Err(PoolError::Config("no daemons configured".to_string()));
        }
        if self.ports.is_empty() {
            return Err(PoolError::Config("no ports configured".to_string()));
        }
        if self.port_numbers().is_empty() {
            return Err(PoolError::Config(
                "no port key parses as a valid port number".to_string(),
            ));
        }
        derive_pool_payout(self)?;
        Ok(())
    }

    /// Ports as `u16`, skipping any key that doesn't parse as one.
    pub fn port_numbers(&self) -> HashMap<u16, PortSettings> {
        self.ports
            .iter()
            .filter_map(|(k, v)| k.parse::<u16>().ok().map(|port| (port, v.clone())))
            .collect()
    }
}

/// Derives where the coinbase's pool-owned output should pay out: a
/// compressed pubkey (P2PK) if `pubkey` is configured, otherwise the
/// base58-decoded hash160 of `address` (P2PKH) (spec §6, §4.2).
pub fn derive_pool_payout(config: &PoolConfig) -> Result<PoolPayout, PoolError> {
    if let Some(pubkey_hex) = &config.pubkey {
        let bytes = equisolo_util::hex_to_bytes(pubkey_hex)
            .map_err(|e| PoolError::Config(format!("invalid pubkey: {e}")))?;
        if bytes.len() != 33 {
            return Err(PoolError::Config(
                "pubkey must decode to 33 bytes (66 hex chars)".to_string(),
            ));
        }
        return Ok(PoolPayout {
            script_type: ScriptPubKeyType::Pubkey,
            payload: bytes,
        });
    }

    let decoded = equisolo_util::base58_to_bytes(&config.address)
        .map_err(|e| PoolError::Config(format!("invalid address: {e}")))?;
    if decoded.len() != 25 && decoded.len() != 26 {
        return Err(PoolError::Config(format!(
            "address decodes to {} bytes, expected 25 or 26",
            decoded.len()
        )));
    }
    let version_len = decoded.len() - 24;
    let hash160 = decoded[version_len..version_len + 20].to_vec();
    Ok(PoolPayout {
        script_type: ScriptPubKeyType::PubkeyHash,
        payload: hash160,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "coin": {"name": "komodo", "symbol": "KMD", "peerMagic": "f9eee48d"},
            "address": "RC36ncbAPM6g7epokSaCGxwV6HZ4nnjUcr",
            "daemons": [{"host": "127.0.0.1", "port": 7771, "user": "u", "password": "p"}],
            "ports": {"3333": {"diff": 1.0}},
        })
    }

    #[test]
    fn parses_minimal_config() {
        let config: PoolConfig = serde_json::from_value(sample_json()).unwrap();
        assert_eq!(config.coin.symbol, "KMD");
        assert_eq!(config.daemons.len(), 1);
        assert_eq!(config.block_refresh_interval, 1000);
        assert!(!config.min_diff_adjust);
    }

    #[test]
    fn validate_rejects_empty_daemons() {
        let mut value = sample_json();
        value["daemons"] = serde_json::json!([]);
        let config: PoolConfig = serde_json::from_value(value).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn min_diff_adjust_accepts_string_true() {
        let mut value = sample_json();
        value["minDiffAdjust"] = serde_json::json!("true");
        let config: PoolConfig = serde_json::from_value(value).unwrap();
        assert!(config.min_diff_adjust);
    }

    #[test]
    fn derive_pool_payout_prefers_pubkey_over_address() {
        let mut value = sample_json();
        value["pubkey"] = serde_json::json!("02".to_string() + &"ab".repeat(32));
        let config: PoolConfig = serde_json::from_value(value).unwrap();
        let payout = derive_pool_payout(&config).unwrap();
        assert_eq!(payout.script_type, ScriptPubKeyType::Pubkey);
        assert_eq!(payout.payload.len(), 33);
    }
}
