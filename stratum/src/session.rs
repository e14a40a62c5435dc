//! Per-connection Stratum client state machine (spec §4.4).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use equisolo_jobmanager::{JobManager, ShareError, ShareOutcome};
use log::{debug, info, warn};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex as TokioMutex};

use crate::errors::{SessionError, StratumWireError};
use crate::target::target_hex_for_difficulty;

/// The capability a Stratum session needs from the Job Manager, cut out as
/// its own small interface (spec §9 DESIGN NOTES, "Cyclic references") so
/// the server never has to know the Job Manager's concrete shape.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn current_job_params(&self, clean_jobs: bool) -> Option<Value>;
    async fn current_difficulty(&self) -> Option<f64>;
    async fn next_extra_nonce1(&self) -> [u8; 4];

    #[allow(clippy::too_many_arguments)]
    async fn submit_share(
        &self,
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
    ) -> Result<ShareOutcome, ShareError>;
}

#[async_trait]
impl JobSource for Arc<TokioMutex<JobManager>> {
    async fn current_job_params(&self, clean_jobs: bool) -> Option<Value> {
        self.lock().await.current_job_params(clean_jobs)
    }

    async fn current_difficulty(&self) -> Option<f64> {
        self.lock().await.current_difficulty()
    }

    async fn next_extra_nonce1(&self) -> [u8; 4] {
        self.lock().await.next_extra_nonce1()
    }

    async fn submit_share(
        &self,
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
        self.lock().await.process_share(
            job_id,
            prev_diff,
            diff,
            extra_nonce1_hex,
            extra_nonce2_hex,
            n_time_hex,
            soln_hex,
            ip,
            port,
            worker,
            submit_time,
        )
    }
}

/// Outcome of the orchestrator-supplied authorization hook. The reference
/// pool always authorizes (spec §4.4, "In the reference behavior this always
/// returns authorized=true"); `disconnect` lets a real hook force a socket
/// teardown (e.g. banned address) without inventing a new error code.
pub struct AuthorizeResult {
    pub authorized: bool,
    pub disconnect: bool,
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        ip: &str,
        local_port: u16,
        addr: &str,
        worker: &str,
        pass: Option<&str>,
    ) -> AuthorizeResult;
}

/// The reference implementation's behavior: every worker is authorized.
pub struct AlwaysAuthorize;

#[async_trait]
impl Authorizer for AlwaysAuthorize {
    async fn authorize(
        &self,
        _ip: &str,
        _local_port: u16,
        _addr: &str,
        _worker: &str,
        _pass: Option<&str>,
    ) -> AuthorizeResult {
        AuthorizeResult {
            authorized: true,
            disconnect: false,
        }
    }
}

/// Per-port settings a session needs at construction (spec §6, `ports`).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub port: u16,
    pub port_diff: f64,
    pub min_diff_adjust: bool,
    pub connection_timeout: Duration,
}

/// Mutable session state (spec §3 DATA MODEL, "Stratum client state").
#[derive(Debug)]
pub struct SessionState {
    pub worker_name: String,
    pub worker_password: Option<String>,
    pub subscription_id: String,
    pub extra_nonce1: String,
    pub subscribed: bool,
    pub authorized: bool,
    pub difficulty: f64,
    pub previous_difficulty: Option<f64>,
    pub pending_difficulty: Option<f64>,
    pub connected_at: Instant,
    pub last_activity: Instant,
}

/// One connected miner. Holds its own mutable state behind a lock so the
/// read loop (parsing requests) and the broadcast path (pushing jobs) can
/// touch it independently.
pub struct StratumSession {
    pub addr: std::net::SocketAddr,
    config: SessionConfig,
    state: TokioMutex<SessionState>,
    tx: mpsc::Sender<String>,
}

impl StratumSession {
    pub fn new(
        addr: std::net::SocketAddr,
        subscription_id: String,
        config: SessionConfig,
        tx: mpsc::Sender<String>,
    ) -> Self {
        let now = Instant::now();
        Self {
            addr,
            config,
            state: TokioMutex::new(SessionState {
                worker_name: String::new(),
                worker_password: None,
                subscription_id,
                extra_nonce1: String::new(),
                subscribed: false,
                authorized: false,
                difficulty: 0.0,
                previous_difficulty: None,
                pending_difficulty: None,
                connected_at: now,
                last_activity: now,
            }),
            tx,
        }
    }

    pub async fn touch(&self) {
        self.state.lock().await.last_activity = Instant::now();
    }

    pub async fn worker_name(&self) -> String {
        self.state.lock().await.worker_name.clone()
    }

    pub async fn idle_for(&self) -> Duration {
        self.state.lock().await.last_activity.elapsed()
    }

    /// `mining.subscribe`: assigns a fresh `extraNonce1` and responds
    /// `[null, extraNonce1]`. Accepted even before authorization, per spec.
    pub async fn handle_subscribe(
        &self,
        id: Value,
        job_source: &dyn JobSource,
    ) -> Result<(), SessionError> {
        let extra_nonce1 = hex::encode(job_source.next_extra_nonce1().await);
        {
            let mut state = self.state.lock().await;
            state.extra_nonce1 = extra_nonce1.clone();
            state.subscribed = true;
        }

        let result = json!([Value::Null, extra_nonce1]);
        self.send_response(id, Some(result), None).await
    }

    /// `mining.authorize`: `params = [addrDotWorker, password?]`.
    pub async fn handle_authorize(
        &self,
        id: Value,
        params: &[Value],
        ip: &str,
        authorizer: &dyn Authorizer,
        job_source: &dyn JobSource,
    ) -> Result<(), SessionError> {
        let raw_login = params.first().and_then(Value::as_str).unwrap_or("");
        let password = params.get(1).and_then(Value::as_str);

        let (addr, worker) = equisolo_util::split_worker_login(raw_login);

        let verdict = authorizer
            .authorize(ip, self.config.port, &addr, &worker, password)
            .await;

        {
            let mut state = self.state.lock().await;
            state.worker_name = format!("{addr}.{worker}");
            state.worker_password = password.map(str::to_string);
            state.authorized = verdict.authorized;
        }

        self.send_response(id, Some(Value::Bool(verdict.authorized)), None)
            .await?;

        if !verdict.authorized {
            return Ok(());
        }

        info!("worker authorized: {addr}.{worker} from {ip}");

        let initial_diff = if self.config.min_diff_adjust {
            self.config.port_diff
        } else {
            job_source
                .current_difficulty()
                .await
                .unwrap_or(self.config.port_diff)
        };
        self.send_difficulty(initial_diff).await?;

        if let Some(job_params) = job_source.current_job_params(true).await {
            self.send_notify(job_params).await?;
        }

        Ok(())
    }

    /// `mining.submit`: `params = [workerName, jobId, nTime, extraNonce2, soln]`.
    /// Always answers `{result:true, error:null}` regardless of the share's
    /// verdict (spec §4.4, intentional: some miners disconnect on rejects).
    pub async fn handle_submit(
        &self,
        id: Value,
        params: &[Value],
        ip: &str,
        job_source: &dyn JobSource,
    ) -> Result<Option<ShareOutcome>, SessionError> {
        let (authorized, subscribed, worker_name, diff, prev_diff, extra_nonce1) = {
            let state = self.state.lock().await;
            (
                state.authorized,
                state.subscribed,
                state.worker_name.clone(),
                state.difficulty,
                state.previous_difficulty,
                state.extra_nonce1.clone(),
            )
        };

        if !authorized {
            return self
                .send_wire_error(id, StratumWireError::UnauthorizedWorker)
                .await
                .map(|_| None);
        }
        if !subscribed {
            return self
                .send_wire_error(id, StratumWireError::NotSubscribed)
                .await
                .map(|_| None);
        }

        let job_id = params.get(1).and_then(Value::as_str).unwrap_or("");
        let n_time_hex = params.get(2).and_then(Value::as_str).unwrap_or("");
        let extra_nonce2_hex = params.get(3).and_then(Value::as_str).unwrap_or("");
        let soln_hex = params.get(4).and_then(Value::as_str).unwrap_or("");

        let submit_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);

        let outcome = job_source
            .submit_share(
                job_id,
                prev_diff,
                diff,
                &extra_nonce1,
                extra_nonce2_hex,
                n_time_hex,
                soln_hex,
                ip,
                self.config.port,
                &worker_name,
                submit_time,
            )
            .await;

        // The miner always sees success; the real verdict is logged and
        // handed back to the caller for orchestrator-level handling
        // (block submission, stats).
        self.send_response(id, Some(Value::Bool(true)), None).await?;

        match outcome {
            Ok(share) => {
                if share.is_block {
                    info!(
                        "block candidate from {worker_name} at height {}",
                        share.height
                    );
                } else {
                    debug!(
                        "share accepted from {worker_name}, diff {:.4}",
                        share.share_diff
                    );
                }
                Ok(Some(share))
            }
            Err(err) => {
                warn!("share rejected from {worker_name}: {err}");
                Ok(None)
            }
        }
    }

    pub async fn handle_get_transactions(&self, id: Value) -> Result<(), SessionError> {
        self.send_response(id, Some(json!([])), Some(Value::Bool(true)))
            .await
    }

    pub async fn handle_extranonce_subscribe(&self, id: Value) -> Result<(), SessionError> {
        self.send_wire_error(id, StratumWireError::NotSupported)
            .await
    }

    pub async fn handle_unknown_method(&self, id: Value, method: &str) -> Result<(), SessionError> {
        debug!("unknown stratum method from {}: {method}", self.addr);
        self.send_response(id, None, Some(json!([20, "unknown method", null])))
            .await
    }

    /// Records a VarDiff-issued retarget so it is picked up at the next
    /// `send_mining_job` call (spec §4.4, "`pendingDifficulty`...applied
    /// before next `mining.notify`").
    pub async fn set_pending_difficulty(&self, new_diff: f64) {
        self.state.lock().await.pending_difficulty = Some(new_diff);
    }

    /// `sendMiningJob`: applies a pending difficulty change if present,
    /// otherwise re-sends the current target (covers a miner that missed the
    /// initial `set_target`), then delivers `mining.notify`. Returns `Err`
    /// if the connection has been idle past `connectionTimeout` and should
    /// be closed instead.
    pub async fn send_mining_job(&self, job_params: Value) -> Result<(), SessionError> {
        if self.idle_for().await > self.config.connection_timeout {
            return Err(SessionError::MalformedMessage(
                "connection idle past connectionTimeout".to_string(),
            ));
        }

        let pending = self.state.lock().await.pending_difficulty.take();
        match pending {
            Some(new_diff) => {
                self.send_difficulty(new_diff).await?;
            }
            None => {
                let diff = self.state.lock().await.difficulty;
                self.resend_target(diff).await?;
            }
        }

        self.send_notify(job_params).await
    }

    /// `sendDifficulty`: a no-op if unchanged or not yet authorized; on
    /// change, records `previousDifficulty` and emits `mining.set_target`.
    async fn send_difficulty(&self, new_diff: f64) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock().await;
            if !state.authorized || (state.difficulty - new_diff).abs() < f64::EPSILON {
                return Ok(());
            }
            if state.difficulty > 0.0 {
                state.previous_difficulty = Some(state.difficulty);
            }
            state.difficulty = new_diff;
        }
        self.resend_target(new_diff).await
    }

    async fn resend_target(&self, diff: f64) -> Result<(), SessionError> {
        let target_hex = target_hex_for_difficulty(diff);
        let notification = json!({
            "id": Value::Null,
            "method": "mining.set_target",
            "params": [target_hex],
        });
        self.send_raw(notification.to_string()).await
    }

    async fn send_notify(&self, job_params: Value) -> Result<(), SessionError> {
        let notification = json!({
            "id": Value::Null,
            "method": "mining.notify",
            "params": job_params,
        });
        self.send_raw(notification.to_string()).await
    }

    async fn send_response(
        &self,
        id: Value,
        result: Option<Value>,
        error: Option<Value>,
    ) -> Result<(), SessionError> {
        let response = json!({
            "id": id,
            "result": result,
            "error": error,
        });
        self.send_raw(response.to_string()).await
    }

    async fn send_wire_error(&self, id: Value, err: StratumWireError) -> Result<(), SessionError> {
        self.send_response(id, None, Some(json!([err.code(), err.message(), Value::Null])))
            .await
    }

    async fn send_raw(&self, data: String) -> Result<(), SessionError> {
        self.tx
            .send(data)
            .await
            .map_err(|e| SessionError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e.to_string())))
    }
}
