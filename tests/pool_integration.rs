//! End-to-end coverage that doesn't fit neatly inside a single crate's unit
//! tests: configuration parsing through payout derivation, the block
//! ledger's on-disk round trip, and the template -> job -> share flow the
//! orchestrator drives in production.

use equisolo_bitcoin::{ScriptPubKeyType, U256};
use equisolo_jobmanager::{JobManager, TemplateOutcome};
use equisolo_pool::config::{derive_pool_payout, PoolConfig};
use equisolo_pool::ledger::{BlockLedger, BlockLedgerEntry};
use equisolo_templates::{CoinbaseTxn, DecodedTemplate, RawTemplate, RawVout};

fn sample_config_json() -> serde_json::Value {
    serde_json::json!({
        "coin": {
            "name": "komodo",
            "symbol": "KMD",
            "peerMagic": "f9eee48d",
            "peerMagicTestnet": "faf97a58"
        },
        "address": "RC36ncbAPM6g7epokSaCGxwV6HZ4nnjUcr",
        "daemons": [{"host": "127.0.0.1", "port": 7771, "user": "u", "password": "p"}],
        "ports": {
            "3333": {
                "diff": 64.0,
                "varDiff": {
                    "targetTime": 30.0,
                    "retargetTime": 30.0,
                    "variancePercent": 30.0,
                    "minDiff": 8.0,
                    "maxDiff": 512000.0
                }
            }
        },
        "p2p": {"enabled": false, "host": "127.0.0.1", "port": 7770},
        "blockRefreshInterval": 15,
        "jobRebroadcastTimeout": 55,
        "minDiffAdjust": "true"
    })
}

#[test]
fn config_validates_and_derives_a_p2pkh_payout_from_the_address() {
    let config: PoolConfig = serde_json::from_value(sample_config_json()).unwrap();
    config.validate().expect("sample config should validate");

    let payout = derive_pool_payout(&config).unwrap();
    assert_eq!(payout.script_type, ScriptPubKeyType::PubkeyHash);
    assert_eq!(payout.payload.len(), 20);

    let ports = config.port_numbers();
    assert_eq!(ports.len(), 1);
    assert!(ports[&3333].var_diff.is_some());
    assert!(config.min_diff_adjust);
}

#[test]
fn config_rejects_an_address_that_is_not_base58() {
    let mut value = sample_config_json();
    value["address"] = serde_json::json!("not-a-valid-address!!");
    let config: PoolConfig = serde_json::from_value(value).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn block_ledger_appends_survive_a_reload_from_disk() {
    let dir = std::env::temp_dir().join(format!(
        "equisolo-pool-ledger-test-{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    let original = std::env::current_dir().unwrap();
    std::env::set_current_dir(&dir).unwrap();

    let ledger = BlockLedger::new("KMD");
    ledger
        .append(BlockLedgerEntry {
            block: 12345,
            finder: "RC36ncbAPM6g7epokSaCGxwV6HZ4nnjUcr.rig1".to_string(),
            date: 1_700_000_000_000,
        })
        .unwrap();

    let raw = std::fs::read_to_string("logs/KMD_blocks.json").unwrap();
    let entries: Vec<BlockLedgerEntry> = serde_json::from_str(&raw).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].block, 12345);

    std::env::set_current_dir(original).unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}

fn sample_decoded(height: u32, prevhash: &str, target: &str) -> DecodedTemplate {
    DecodedTemplate {
        raw: RawTemplate {
            previousblockhash: prevhash.to_string(),
            final_sapling_root_hash: "22".repeat(32),
            bits: "1f0ffff0".to_string(),
            curtime: 1_700_000_000,
            height,
            version: 4,
            target: target.to_string(),
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

/// Mirrors the scenario SPEC_FULL.md's test-tooling section calls for: a
/// fresh template becomes a job, a share that beats the block target is
/// accepted as a block, and the same share submitted twice is rejected as a
/// duplicate.
#[test]
fn template_to_job_to_block_share_end_to_end() {
    let payout = equisolo_templates::PoolPayout {
        script_type: ScriptPubKeyType::PubkeyHash,
        payload: vec![0xCD; 20],
    };
    let mut jm = JobManager::new(U256::from_big_endian(&[0x0F; 32]));

    let decoded = sample_decoded(500_000, &"00".repeat(32), &"ff".repeat(32));
    let outcome = jm.process_template(&decoded, &payout);
    let job_id = match outcome {
        TemplateOutcome::NewBlock { job_id, .. } => job_id,
        _ => panic!("first template should always be a new block"),
    };
    assert_eq!(jm.current_height(), Some(500_000));

    let soln = "ab".repeat(1347);
    let accepted = jm
        .process_share(
            &job_id,
            None,
            1.0,
            "00000000",
            &"00".repeat(28),
            "6553f132",
            &soln,
            "203.0.113.10",
            3333,
            "RAddr.rig1",
            1_700_000_100,
        )
        .expect("share against the max target should validate");
    assert!(accepted.is_block);
    assert!(accepted.block_hex.is_some());

    let duplicate = jm.process_share(
        &job_id,
        None,
        1.0,
        "00000000",
        &"00".repeat(28),
        "6553f132",
        &soln,
        "203.0.113.10",
        3333,
        "RAddr.rig1",
        1_700_000_100,
    );
    assert!(duplicate.is_err());

    // A fresh template at the next height clears the old job out.
    let next = sample_decoded(500_001, &"11".repeat(32), &"ff".repeat(32));
    let outcome = jm.process_template(&next, &payout);
    assert!(outcome.is_new_block());
    assert_eq!(
        jm.process_share(
            &job_id,
            None,
            1.0,
            "00000000",
            &"00".repeat(28),
            "6553f132",
            &soln,
            "203.0.113.10",
            3333,
            "RAddr.rig1",
            1_700_000_200,
        )
        .unwrap_err(),
        equisolo_jobmanager::ShareError::JobNotFound
    );
}
