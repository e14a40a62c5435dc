//! The pool orchestrator (spec §4.7): wires the daemon fan-out, Job Manager,
//! Stratum server, VarDiff controller, and the optional P2P peer together,
//! drives the startup sequence, and reacts to templates/shares/block-notify
//! events for as long as the process runs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use equisolo_bitcoin::{algorithm_by_tag, AlgorithmParams};
use equisolo_daemon::{DaemonClient, DaemonError};
use equisolo_jobmanager::{JobManager, ShareOutcome, TemplateOutcome};
use equisolo_p2p::{PeerClient, PeerConfig, PeerEvent};
use equisolo_stratum::{AlwaysAuthorize, PortConfig, ShareSink, StratumServer};
use equisolo_templates::PoolPayout;
use equisolo_vardiff::VarDiffRegistry;
use log::{debug, info, warn};
use serde_json::{json, Value};
use tokio::sync::Mutex as TokioMutex;

use crate::config::{derive_pool_payout, PoolConfig};
use crate::errors::PoolError;
use crate::ledger::{now_millis, BlockLedger, BlockLedgerEntry};
use crate::template_decode::decode_template;

/// Derived from `getinfo.staked` at startup (spec §4.7 step 4). Not
/// otherwise consulted: this is a solo pool, there is no payout-splitting
/// logic that would branch on it, but a real deployment still wants it in
/// its stats/logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardType {
    Pow,
    Pos,
}

/// Snapshot exposed to whatever external log sink / CLI notifier polls it
/// (spec §1, "out of scope" collaborator; this struct is the data it reads).
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub connected_miners: usize,
    pub shares_seen: u64,
    pub current_height: Option<u32>,
    pub current_difficulty: Option<f64>,
    pub last_block_time: Option<i64>,
}

const GETBLOCKTEMPLATE_CAPABILITIES: &[&str] = &["coinbasetxn", "workid", "coinbase/append"];

pub struct Orchestrator {
    config: PoolConfig,
    daemon: DaemonClient,
    job_manager: Arc<TokioMutex<JobManager>>,
    vardiff: Arc<TokioMutex<VarDiffRegistry>>,
    stratum: Arc<StratumServer>,
    pool_payout: PoolPayout,
    ledger: BlockLedger,
    stats: Arc<TokioMutex<PoolStats>>,
    reward_type: Arc<TokioMutex<Option<RewardType>>>,
    testnet: Arc<TokioMutex<bool>>,
    /// Flipped by `stop()` (wired to `ctrl_c` in `main`); background loops
    /// check it once per tick and wind down instead of being killed.
    shutdown: Arc<std::sync::Mutex<bool>>,
}

impl Orchestrator {
    /// Builds every piece that doesn't require network I/O: VarDiff
    /// instances, the Job Manager, the Stratum server (spec §4.7 steps 1, 5).
    pub fn new(config: PoolConfig) -> Result<Arc<Self>, PoolError> {
        config.validate()?;

        let pool_payout = derive_pool_payout(&config)?;
        let algo = algorithm_for(&config.coin.name);
        let job_manager = Arc::new(TokioMutex::new(JobManager::new(algo.diff1)));

        let mut vardiff = VarDiffRegistry::new();
        for (port, settings) in config.port_numbers() {
            if let Some(var_diff) = &settings.var_diff {
                vardiff.register_port(port, var_diff.to_vardiff_config());
            }
        }
        let vardiff = Arc::new(TokioMutex::new(vardiff));

        let stats = Arc::new(TokioMutex::new(PoolStats::default()));
        let ledger = BlockLedger::new(&config.coin.symbol);
        let daemon = DaemonClient::new(config.daemons.clone());

        let this = Arc::new_cyclic(|weak: &std::sync::Weak<Self>| {
            let weak = weak.clone();
            let share_sink: ShareSink = Arc::new(move |share: ShareOutcome| {
                if let Some(this) = weak.upgrade() {
                    tokio::spawn(async move { this.handle_share(share).await });
                }
            });
            Self {
                stratum: Arc::new(StratumServer::new(
                    Arc::new(job_manager.clone()) as Arc<dyn equisolo_stratum::JobSource>,
                    Arc::new(AlwaysAuthorize),
                    config.min_diff_adjust,
                    Duration::from_secs(config.connection_timeout),
                    config.tcp_proxy_protocol,
                    share_sink,
                )),
                job_manager,
                vardiff,
                pool_payout,
                ledger,
                stats,
                reward_type: Arc::new(TokioMutex::new(None)),
                testnet: Arc::new(TokioMutex::new(false)),
                shutdown: Arc::new(std::sync::Mutex::new(false)),
                daemon,
                config,
            }
        });

        Ok(this)
    }

    /// Runs the full startup sequence (spec §4.7 steps 2-10), then blocks
    /// forever driving the periodic-refresh background task.
    pub async fn run(self: &Arc<Self>) -> Result<(), PoolError> {
        info!("block-submission API hook not configured; wire equisolo_pool::Orchestrator::process_block_notify to an external trigger if one is needed");

        self.await_daemon_online().await?;
        self.probe_coin_data().await?;
        self.wait_for_sync().await?;

        let first_template = self.fetch_and_process_template().await?;
        self.dispatch_outcome(first_template).await;

        self.start_periodic_refresh();

        if self.config.p2p.enabled {
            self.start_p2p_peer();
        }

        for (port, settings) in self.config.port_numbers() {
            self.stratum
                .listen(PortConfig { port, diff: settings.diff })
                .await?;
        }

        if let Some(params) = self.job_manager.lock().await.current_job_params(true) {
            self.stratum.broadcast_job(params).await;
        }
        info!("stratum server started, broadcasting initial job");

        Ok(())
    }

    /// spec §4.7 step 3: "Initialize the daemon client; await `online`."
    /// `online` only fires once every configured daemon instance answers
    /// `getinfo`; a partial failure is `connectionFailed`, the same as all
    /// instances being down, not something startup quietly proceeds past.
    async fn await_daemon_online(&self) -> Result<(), PoolError> {
        let results = self.daemon.cmd("getinfo", vec![]).await;
        if results.iter().all(Result::is_ok) {
            Ok(())
        } else {
            Err(PoolError::NoDaemonOnline)
        }
    }

    /// spec §4.7 step 4.
    async fn probe_coin_data(&self) -> Result<(), PoolError> {
        let results = self
            .daemon
            .batch_cmd(vec![
                ("validateaddress", vec![json!(self.config.address)]),
                ("getdifficulty", vec![]),
                ("getinfo", vec![]),
                ("getmininginfo", vec![]),
            ])
            .await?;

        let validate_address = results.first().ok_or_else(|| {
            PoolError::Config("daemon did not answer validateaddress".to_string())
        })?;
        if !validate_address.get("isvalid").and_then(Value::as_bool).unwrap_or(false) {
            return Err(PoolError::Config(format!(
                "configured address {} is not valid on this daemon",
                self.config.address
            )));
        }

        let getinfo = results.get(2).ok_or_else(|| {
            PoolError::Config("daemon did not answer getinfo".to_string())
        })?;
        let staked = getinfo.get("staked").and_then(Value::as_bool).unwrap_or(false);
        *self.reward_type.lock().await = Some(if staked { RewardType::Pos } else { RewardType::Pow });
        *self.testnet.lock().await = getinfo.get("testnet").and_then(Value::as_bool).unwrap_or(false);

        if let Some(blocks) = getinfo.get("blocks").and_then(Value::as_u64) {
            self.stats.lock().await.current_height = Some(blocks as u32);
        }

        info!(
            "coin data probed: address valid, reward type {:?}, testnet {}",
            self.reward_type.lock().await,
            self.testnet.lock().await
        );
        Ok(())
    }

    /// spec §4.7 step 6: poll `getblocktemplate` until the chain is synced.
    async fn wait_for_sync(&self) -> Result<(), PoolError> {
        loop {
            match self.get_block_template_raw().await {
                Ok(_) => return Ok(()),
                Err(PoolError::Daemon(DaemonError::Rpc { code: -10, .. })) => {
                    self.report_sync_progress().await;
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn report_sync_progress(&self) {
        let getinfo = self.daemon.cmd("getinfo", vec![]).await.into_iter().next();
        let getpeerinfo = self.daemon.cmd("getpeerinfo", vec![]).await.into_iter().next();

        let blocks = getinfo
            .and_then(Result::ok)
            .and_then(|v| v.get("blocks").and_then(Value::as_u64).map(|b| b as u64));
        let peer_best = getpeerinfo.and_then(Result::ok).and_then(|peers| {
            peers
                .as_array()?
                .iter()
                .filter_map(|p| p.get("startingheight").and_then(Value::as_i64))
                .max()
        });

        match (blocks, peer_best) {
            (Some(blocks), Some(target)) if target > 0 => {
                let progress = (blocks as f64 / target as f64) * 100.0;
                info!("chain syncing: {progress:.1}% ({blocks}/{target})");
            }
            _ => info!("chain syncing..."),
        }
    }

    /// One `getblocktemplate` round trip against the primary daemon.
    async fn get_block_template_raw(&self) -> Result<Value, PoolError> {
        let result = self
            .daemon
            .cmd(
                "getblocktemplate",
                vec![json!({ "capabilities": GETBLOCKTEMPLATE_CAPABILITIES })],
            )
            .await
            .into_iter()
            .next()
            .ok_or(PoolError::NoDaemonOnline)?;
        Ok(result?)
    }

    async fn fetch_and_process_template(&self) -> Result<TemplateOutcome, PoolError> {
        let raw = self.get_block_template_raw().await?;
        let decoded = decode_template(&self.daemon, raw).await?;
        let outcome = self.job_manager.lock().await.process_template(&decoded, &self.pool_payout);
        Ok(outcome)
    }

    /// Broadcasts whatever `processTemplate` decided, and refreshes VarDiff's
    /// network-difficulty ceiling on a genuinely new block (spec §4.5, last
    /// line).
    async fn dispatch_outcome(&self, outcome: TemplateOutcome) {
        match outcome {
            TemplateOutcome::NewBlock { job_params, .. } => {
                self.stratum.broadcast_job(job_params).await;
                self.refresh_stats_and_vardiff().await;
                info!("new block: job broadcast with cleanJobs=true");
            }
            TemplateOutcome::UpdatedBlock { job_params, .. } => {
                self.stratum.broadcast_job(job_params).await;
                self.refresh_stats_and_vardiff().await;
                debug!("updated block: job broadcast with cleanJobs=false");
            }
            TemplateOutcome::Dropped => {}
        }
    }

    async fn refresh_stats_and_vardiff(&self) {
        let jm = self.job_manager.lock().await;
        let height = jm.current_height();
        let difficulty = jm.current_difficulty();
        drop(jm);

        let mut stats = self.stats.lock().await;
        stats.current_height = height;
        stats.current_difficulty = difficulty;
        drop(stats);

        if let Some(difficulty) = difficulty {
            self.vardiff.lock().await.set_network_difficulty_for_all(difficulty);
        }
    }

    async fn refresh_template(self: &Arc<Self>) {
        match self.fetch_and_process_template().await {
            Ok(outcome) => self.dispatch_outcome(outcome).await,
            Err(err) => warn!("template refresh failed: {err}"),
        }
    }

    /// spec §4.7 step 8: periodic `getblocktemplate` polling, plus the
    /// `broadcastTimeout` rebroadcast (spec §4.7 event wiring). Both reduce
    /// to the same `refresh_template` call: `processTemplate`'s "no change"
    /// branch already rebroadcasts in place when nothing moved.
    fn start_periodic_refresh(self: &Arc<Self>) {
        if self.config.block_refresh_interval > 0 {
            let this = self.clone();
            let interval = Duration::from_secs(self.config.block_refresh_interval as u64);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    if this.is_shutting_down() {
                        break;
                    }
                    this.refresh_template().await;
                }
            });
        }

        if self.config.job_rebroadcast_timeout > 0 {
            let this = self.clone();
            let interval = Duration::from_secs(self.config.job_rebroadcast_timeout);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    if this.is_shutting_down() {
                        break;
                    }
                    this.refresh_template().await;
                }
            });
        }
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.lock().unwrap()
    }

    /// Flips the shutdown flag (spec SPEC_FULL §C.2); the periodic refresh
    /// loops notice on their next tick and exit instead of being aborted.
    pub fn stop(&self) {
        *self.shutdown.lock().unwrap() = true;
    }

    /// spec §4.7 step 9: the optional P2P fast path.
    fn start_p2p_peer(self: &Arc<Self>) {
        let testnet = self.testnet.clone();
        let p2p = self.config.p2p.clone();
        let peer_magic_hex = self.config.coin.peer_magic.clone();
        let peer_magic_testnet_hex = self.config.coin.peer_magic_testnet.clone();
        let this = self.clone();

        tokio::spawn(async move {
            let magic_hex = if *testnet.lock().await && !peer_magic_testnet_hex.is_empty() {
                peer_magic_testnet_hex
            } else {
                peer_magic_hex
            };
            let magic = match hex::decode(&magic_hex) {
                Ok(bytes) if bytes.len() == 4 => u32::from_le_bytes(bytes.try_into().unwrap()),
                _ => {
                    warn!("p2p disabled: coin.peerMagic {magic_hex:?} is not 4 bytes of hex");
                    return;
                }
            };

            let sink_target = this.clone();
            let sink: equisolo_p2p::PeerEventSink = Arc::new(move |event| {
                if let PeerEvent::BlockFound(hash) = event {
                    let target = sink_target.clone();
                    tokio::spawn(async move { target.process_block_notify(&hash, "p2p").await });
                }
            });

            let client = PeerClient::new(
                PeerConfig {
                    host: p2p.host,
                    port: p2p.port,
                    magic,
                    reconnect_delay: Duration::from_secs(10),
                },
                sink,
            );

            if let Err(err) = client.run().await {
                warn!("p2p peer connection rejected, fast path disabled: {err}");
            }
        });
    }

    /// External `processBlockNotify(hash, source)` and the P2P `blockFound`
    /// event both land here (spec §4.7 event wiring): if `hash` differs from
    /// the current job's `previousblockhash`, fetch a fresh template after a
    /// 500ms delay.
    pub async fn process_block_notify(self: &Arc<Self>, hash: &str, source: &str) {
        let current = self.job_manager.lock().await.current_previousblockhash();
        if current.as_deref() == Some(hash) {
            return;
        }
        debug!("block notify from {source}: {hash} differs from the current job, scheduling refresh");
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            this.refresh_template().await;
        });
    }

    /// Invoked (via the `ShareSink` closure wired in `new`) for every share
    /// the Stratum server accepts, block or not.
    async fn handle_share(self: Arc<Self>, share: ShareOutcome) {
        self.stats.lock().await.shares_seen += 1;

        if let Some(new_diff) = self
            .vardiff
            .lock()
            .await
            .on_submit(share.port, Instant::now(), share.difficulty)
        {
            self.stratum.set_pending_difficulty(&share.worker, new_diff).await;
        }

        if share.is_block {
            self.submit_block(&share).await;
        }
    }

    /// `share` with `blockHex` in spec §4.7's event wiring: `submitblock` ->
    /// wait 500ms -> `getblock` to confirm acceptance -> record in the
    /// ledger -> fetch a fresh template immediately.
    async fn submit_block(self: &Arc<Self>, share: &ShareOutcome) {
        let block_hex = match &share.block_hex {
            Some(bytes) => bytes,
            None => return,
        };

        let results = self.daemon.cmd("submitblock", vec![json!(hex::encode(block_hex))]).await;

        // spec §9, "submitblock loops results but returns on first error":
        // stop examining instances the moment one doesn't say `null`.
        for result in results {
            match result {
                Ok(Value::Null) => continue,
                Ok(Value::String(s)) => {
                    warn!("submitblock response from daemon: {s}");
                    return;
                }
                Ok(other) => {
                    warn!("daemon responded with something it shouldn't: {other}");
                    return;
                }
                Err(err) => {
                    warn!("submitblock request failed: {err}");
                    return;
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(500)).await;

        let lookup_hash = match &share.block_hash {
            Some(hash) => hash.clone(),
            None => return,
        };

        let get_block = self
            .daemon
            .cmd("getblock", vec![json!(lookup_hash)])
            .await
            .into_iter()
            .next();

        match get_block {
            Some(Ok(block_info)) => {
                let height = block_info
                    .get("height")
                    .and_then(Value::as_u64)
                    .unwrap_or(share.height as u64) as u32;
                let coinbase_txid = block_info
                    .get("tx")
                    .and_then(Value::as_array)
                    .and_then(|arr| arr.first())
                    .and_then(Value::as_str)
                    .unwrap_or_default();

                info!("block accepted at height {height}, coinbase txid {coinbase_txid}, found by {}", share.worker);

                if let Err(err) = self.ledger.append(BlockLedgerEntry {
                    block: height,
                    finder: share.worker.clone(),
                    date: now_millis(),
                }) {
                    warn!("failed to append block ledger entry: {err}");
                }
                self.stats.lock().await.last_block_time = Some(now_millis());

                self.refresh_template().await;
            }
            Some(Err(err)) => warn!("getblock could not confirm acceptance: {err}"),
            None => warn!("getblock could not confirm acceptance: no daemon answered"),
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let mut stats = self.stats.lock().await.clone();
        stats.connected_miners = self.stratum.connected_clients().await;
        stats
    }
}

/// Maps the coin's configured name to its Equihash variant's `(diff1,
/// minDiff)` table (spec §3 DATA MODEL). No such key is named in spec §6's
/// recognized config keys, so `coin.name` doubles as the tag; unrecognized
/// names fall back to `equisolo_bitcoin::algos::zcash` (see DESIGN.md).
fn algorithm_for(coin_name: &str) -> AlgorithmParams {
    algorithm_by_tag(&coin_name.to_lowercase()).unwrap_or_else(|| algorithm_by_tag("equihash").unwrap())
}
