//! Block ledger (spec §6, "Block ledger"): an append-only JSON array at
//! `logs/<SYMBOL>_blocks.json`. Grounded on the read-modify-write idiom of
//! the teacher's `storage/src/json_store.rs` (read the whole file, mutate in
//! memory, write it back), adapted here to write through a temp file and
//! rename it into place so a crash mid-write can't truncate the ledger.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::errors::PoolError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockLedgerEntry {
    pub block: u32,
    pub finder: String,
    pub date: i64,
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub struct BlockLedger {
    path: PathBuf,
}

impl BlockLedger {
    pub fn new(symbol: &str) -> Self {
        Self {
            path: PathBuf::from("logs").join(format!("{symbol}_blocks.json")),
        }
    }

    /// Reads the existing ledger (an absent file reads as `[]`), appends one
    /// entry, and atomically replaces the file.
    pub fn append(&self, entry: BlockLedgerEntry) -> Result<(), PoolError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut entries: Vec<BlockLedgerEntry> = match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        entries.push(entry);

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serde_json::to_vec_pretty(&entries)?)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_creates_and_grows_the_ledger() {
        let dir = std::env::temp_dir().join(format!("equisolo-ledger-test-{}", now_millis()));
        let _ = std::fs::remove_dir_all(&dir);
        let original = std::env::current_dir().unwrap();
        std::fs::create_dir_all(&dir).unwrap();
        std::env::set_current_dir(&dir).unwrap();

        let ledger = BlockLedger::new("KMD");
        ledger
            .append(BlockLedgerEntry {
                block: 100,
                finder: "RAddr.rig1".to_string(),
                date: 1_700_000_000_000,
            })
            .unwrap();
        ledger
            .append(BlockLedgerEntry {
                block: 101,
                finder: "RAddr.rig2".to_string(),
                date: 1_700_000_001_000,
            })
            .unwrap();

        let contents = std::fs::read_to_string("logs/KMD_blocks.json").unwrap();
        let parsed: Vec<BlockLedgerEntry> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].block, 101);

        std::env::set_current_dir(original).unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
