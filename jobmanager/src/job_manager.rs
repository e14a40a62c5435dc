//! The Job Manager (spec §4.3): template lifecycle and share validation.

use std::collections::HashMap;

use equisolo_bitcoin::{difficulty_from_target, reverse_bytes, sha256d, u256_from_be_hex, U256};
use equisolo_templates::{parse_target, raw_previousblockhash_hex, BlockTemplate, DecodedTemplate, PoolPayout};
use log::{debug, info};
use serde_json::Value;

use crate::counters::{ExtraNonceCounter, JobCounter};
use crate::errors::ShareError;

/// What `processTemplate` decided to do with an incoming `getblocktemplate`
/// response.
pub enum TemplateOutcome {
    /// Stale notification (height regressed for a differing prevhash); no
    /// state changed.
    Dropped,
    /// Height advanced: a fresh template replaced the current one and the
    /// valid-jobs map was cleared.
    NewBlock { job_id: String, job_params: Value },
    /// Same height, but the target (or, via `updateCurrentJob`, anything
    /// else) changed: a fresh template replaced the current one in place.
    UpdatedBlock { job_id: String, job_params: Value },
}

impl TemplateOutcome {
    pub fn is_new_block(&self) -> bool {
        matches!(self, TemplateOutcome::NewBlock { .. })
    }
}

/// The outcome of validating one submitted share, carried upward regardless
/// of block-ness (spec §4.3, "Emit a `share` event regardless...").
#[derive(Clone)]
pub struct ShareOutcome {
    pub job_id: String,
    pub ip: String,
    pub port: u16,
    pub worker: String,
    pub height: u32,
    pub difficulty: f64,
    pub share_diff: f64,
    pub block_diff: f64,
    pub block_diff_actual: f64,
    pub is_block: bool,
    pub block_hash: Option<String>,
    pub block_hex: Option<Vec<u8>>,
}

/// Owns the template lifecycle: a map from `jobId` to every template still
/// considered valid, plus a pointer to which one is current. Kept as a
/// single map (rather than a separate `current` slot holding its own copy)
/// so that `register_submit`'s in-place dedup set stays consistent between
/// "the current job" and "a job miners can still submit against".
pub struct JobManager {
    valid_jobs: HashMap<String, BlockTemplate>,
    current_job_id: Option<String>,
    extra_nonce_counter: ExtraNonceCounter,
    job_counter: JobCounter,
    diff1: U256,
}

impl JobManager {
    pub fn new(diff1: U256) -> Self {
        Self {
            valid_jobs: HashMap::new(),
            current_job_id: None,
            extra_nonce_counter: ExtraNonceCounter::new(),
            job_counter: JobCounter::new(),
            diff1,
        }
    }

    pub fn next_extra_nonce1(&mut self) -> [u8; 4] {
        self.extra_nonce_counter.next()
    }

    fn current(&self) -> Option<&BlockTemplate> {
        self.current_job_id.as_ref().and_then(|id| self.valid_jobs.get(id))
    }

    pub fn current_job_params(&self, clean_jobs: bool) -> Option<Value> {
        self.current().map(|j| j.job_params(clean_jobs))
    }

    pub fn current_height(&self) -> Option<u32> {
        self.current().map(|j| j.height)
    }

    pub fn current_difficulty(&self) -> Option<f64> {
        self.current().map(|j| j.difficulty)
    }

    /// Display-order `previousblockhash` of the current job, used by the
    /// orchestrator to decide whether a block-notify hash names a block it
    /// already knows about.
    pub fn current_previousblockhash(&self) -> Option<String> {
        self.current()
            .map(|j| raw_previousblockhash_hex(&j.previousblockhash_reversed))
    }

    fn build_template(&mut self, decoded: &DecodedTemplate, pool_payout: &PoolPayout) -> BlockTemplate {
        let job_id = self.job_counter.next();
        BlockTemplate::build(job_id, decoded, pool_payout, self.diff1)
    }

    /// `processTemplate`: the five-branch decision tree of spec §4.3.
    pub fn process_template(&mut self, decoded: &DecodedTemplate, pool_payout: &PoolPayout) -> TemplateOutcome {
        let incoming_prevhash = decoded.raw.previousblockhash.clone();
        let incoming_height = decoded.raw.height;
        let incoming_target = parse_target(&decoded.raw);

        let current = match self.current() {
            // 1. no current job -> treat as new block
            None => return self.commit_new_block(decoded, pool_payout),
            Some(c) => c,
        };

        let current_prevhash = raw_previousblockhash_hex(&current.previousblockhash_reversed);
        let current_height = current.height;
        let current_target = current.target;
        let current_difficulty = current.difficulty;

        // 2. previousblockhash differs but height regressed -> stale, drop
        if incoming_prevhash != current_prevhash && incoming_height < current_height {
            debug!(
                "dropping stale template: height {} < current height {}",
                incoming_height, current_height
            );
            return TemplateOutcome::Dropped;
        }

        // 3. height unchanged, target changed -> updated block in place
        if incoming_height == current_height && incoming_target != current_target {
            info!(
                "difficulty transition at height {}: {} -> target {}",
                current_height, current_difficulty, incoming_target
            );
            return self.commit_updated_block(decoded, pool_payout);
        }

        // 4. height changed -> new block
        if incoming_height != current_height {
            return self.commit_new_block(decoded, pool_payout);
        }

        // 5. no change -> refresh in place
        self.commit_updated_block(decoded, pool_payout)
    }

    fn commit_new_block(&mut self, decoded: &DecodedTemplate, pool_payout: &PoolPayout) -> TemplateOutcome {
        let template = self.build_template(decoded, pool_payout);
        let job_id = template.job_id.clone();
        let job_params = template.job_params(true);

        self.valid_jobs.clear();
        self.valid_jobs.insert(job_id.clone(), template);
        self.current_job_id = Some(job_id.clone());

        TemplateOutcome::NewBlock { job_id, job_params }
    }

    fn commit_updated_block(&mut self, decoded: &DecodedTemplate, pool_payout: &PoolPayout) -> TemplateOutcome {
        let template = self.build_template(decoded, pool_payout);
        let job_id = template.job_id.clone();
        let job_params = template.job_params(false);

        self.valid_jobs.insert(job_id.clone(), template);
        self.current_job_id = Some(job_id.clone());

        TemplateOutcome::UpdatedBlock { job_id, job_params }
    }

    /// `updateCurrentJob`: unconditionally builds a fresh template and
    /// registers it, used by the orchestrator's rebroadcast-timeout path.
    pub fn update_current_job(&mut self, decoded: &DecodedTemplate, pool_payout: &PoolPayout) -> TemplateOutcome {
        self.commit_updated_block(decoded, pool_payout)
    }

    /// `processShare`: validates a submission against the job it names, in
    /// the strict order spec §4.3 lists: job lookup first (so an unknown
    /// `jobId` always wins over a malformed `nTime` in the same submission),
    /// then `nTime`, then nonce/solution sizing, then duplicate detection.
    ///
    /// The header's 32-byte nonce is `extraNonce1 || extraNonce2`:
    /// `extraNonce1` is the 4-byte value handed out at `mining.subscribe`
    /// time, `extraNonce2` is the wire's submitted field. Splicing them
    /// together is what makes `extraNonce1`'s per-client uniqueness actually
    /// partition the search space between miners.
    #[allow(clippy::too_many_arguments)]
    pub fn process_share(
        &mut self,
        job_id: &str,
        prev_diff: Option<f64>,
        diff: f64,
        extra_nonce1_hex: &str,
        extra_nonce2_hex: &str,
        n_time_hex: &str,
        soln_hex: &str,
        ip: &str,
        port: u16,
        worker: &str,
        submit_time: u32,
    ) -> Result<ShareOutcome, ShareError> {
        let template = self.valid_jobs.get_mut(job_id).ok_or(ShareError::JobNotFound)?;

        if n_time_hex.len() != 8 {
            return Err(ShareError::InvalidNTimeSize);
        }
        let n_time = u32::from_str_radix(n_time_hex, 16).map_err(|_| ShareError::InvalidNTimeValue)?;

        if n_time < template.curtime || n_time > submit_time + 7200 {
            return Err(ShareError::NTimeOutOfRange);
        }

        if extra_nonce2_hex.len() != 56 {
            return Err(ShareError::InvalidNonceSize);
        }
        if soln_hex.len() != 2694 {
            return Err(ShareError::InvalidSolutionSize);
        }

        let nonce = build_nonce(extra_nonce1_hex, extra_nonce2_hex).ok_or(ShareError::InvalidNonceSize)?;
        let header = template.build_header(n_time, &nonce);
        let header_hex = hex::encode(header);

        if !template.register_submit(&header_hex, soln_hex) {
            return Err(ShareError::DuplicateShare);
        }

        let soln_bytes = hex::decode(soln_hex).map_err(|_| ShareError::InvalidSolutionSize)?;

        let mut header_and_soln = Vec::with_capacity(header.len() + soln_bytes.len());
        header_and_soln.extend_from_slice(&header);
        header_and_soln.extend_from_slice(&soln_bytes);
        let header_hash = sha256d(&header_and_soln);

        let h = u256_from_be_hex(&hex::encode(reverse_bytes(&header_hash))).unwrap_or_else(U256::zero);
        let share_diff = difficulty_from_target(self.diff1, h);

        let is_block = h <= template.target;

        let (block_hash, block_hex) = if is_block {
            let block_hex = template.serialize_block(&header, &soln_bytes);
            let block_hash = hex::encode(reverse_bytes(&header_hash));
            (Some(block_hash), Some(block_hex))
        } else {
            let ratio = share_diff / diff;
            if ratio < 0.99 {
                let tolerated = prev_diff.map(|p| share_diff >= p).unwrap_or(false);
                if !tolerated {
                    return Err(ShareError::LowDifficulty(share_diff));
                }
            }
            (None, None)
        };

        Ok(ShareOutcome {
            job_id: job_id.to_string(),
            ip: ip.to_string(),
            port,
            worker: worker.to_string(),
            height: template.height,
            difficulty: diff,
            share_diff,
            block_diff: template.difficulty,
            block_diff_actual: share_diff,
            is_block,
            block_hash,
            block_hex,
        })
    }
}

fn build_nonce(extra_nonce1_hex: &str, extra_nonce2_hex: &str) -> Option<[u8; 32]> {
    let extra_nonce1 = hex::decode(extra_nonce1_hex).ok()?;
    let extra_nonce2 = hex::decode(extra_nonce2_hex).ok()?;
    if extra_nonce1.len() + extra_nonce2.len() != 32 {
        return None;
    }
    let mut out = [0u8; 32];
    out[..extra_nonce1.len()].copy_from_slice(&extra_nonce1);
    out[extra_nonce1.len()..].copy_from_slice(&extra_nonce2);
    Some(out)
}
