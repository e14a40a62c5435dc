//! Listening server: accepts connections per configured port, frames the
//! newline-delimited JSON wire, dispatches requests to a [`StratumSession`],
//! and broadcasts jobs (spec §4.4, "Server").

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

use equisolo_jobmanager::ShareOutcome;

use crate::session::{Authorizer, JobSource, SessionConfig, StratumSession};

/// A single Stratum request (client to server). Notifications the server
/// sends use a bare `json!` object instead of this type.
#[derive(Debug, Deserialize)]
struct StratumRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Vec<Value>,
}

/// 10 KiB: the flood guard named in spec §4.4.
const MAX_LINE_LENGTH: usize = 10 * 1024;

/// A port the server listens on, with its own initial-difficulty policy.
#[derive(Debug, Clone)]
pub struct PortConfig {
    pub port: u16,
    pub diff: f64,
}

/// Something a new share outcome (block or not) gets handed to, so the
/// orchestrator can react (submit the block, log it, update stats) without
/// the server needing to know about daemons or ledgers.
pub type ShareSink = Arc<dyn Fn(ShareOutcome) + Send + Sync>;

type Registry = Arc<RwLock<HashMap<SocketAddr, Arc<StratumSession>>>>;

pub struct StratumServer {
    job_source: Arc<dyn JobSource>,
    authorizer: Arc<dyn Authorizer>,
    min_diff_adjust: bool,
    connection_timeout: Duration,
    tcp_proxy_protocol: bool,
    share_sink: ShareSink,
    subscription_counter: Arc<std::sync::Mutex<crate::subscription::SubscriptionCounter>>,
    sessions: Registry,
}

impl StratumServer {
    pub fn new(
        job_source: Arc<dyn JobSource>,
        authorizer: Arc<dyn Authorizer>,
        min_diff_adjust: bool,
        connection_timeout: Duration,
        tcp_proxy_protocol: bool,
        share_sink: ShareSink,
    ) -> Self {
        Self {
            job_source,
            authorizer,
            min_diff_adjust,
            connection_timeout,
            tcp_proxy_protocol,
            share_sink,
            subscription_counter: Arc::new(std::sync::Mutex::new(
                crate::subscription::SubscriptionCounter::new(),
            )),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Binds and begins accepting on one configured port. Returns once the
    /// listener is bound; the accept loop runs as a background task.
    pub async fn listen(self: &Arc<Self>, port_config: PortConfig) -> std::io::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port_config.port)).await?;
        info!("stratum server listening on port {}", port_config.port);

        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, addr)) => {
                        if let Err(e) = socket.set_nodelay(true) {
                            warn!("failed to set TCP_NODELAY for {addr}: {e}");
                        }
                        let this = this.clone();
                        let port_config = port_config.clone();
                        tokio::spawn(async move {
                            this.handle_connection(socket, addr, port_config).await;
                        });
                    }
                    Err(e) => {
                        error!("error accepting connection on port {}: {e}", port_config.port);
                    }
                }
            }
        });

        Ok(())
    }

    async fn handle_connection(self: Arc<Self>, socket: TcpStream, addr: SocketAddr, port_config: PortConfig) {
        info!("new stratum connection from {addr} on port {}", port_config.port);

        let subscription_id = self.subscription_counter.lock().unwrap().next();
        let session_config = SessionConfig {
            port: port_config.port,
            port_diff: port_config.diff,
            min_diff_adjust: self.min_diff_adjust,
            connection_timeout: self.connection_timeout,
        };

        let (tx, mut rx) = mpsc::channel::<String>(256);
        let session = Arc::new(StratumSession::new(addr, subscription_id, session_config, tx));

        self.sessions.write().await.insert(addr, session.clone());

        let (read_half, write_half) = socket.into_split();
        let mut reader = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let mut writer = FramedWrite::new(write_half, LinesCodec::new());

        let writer_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if writer.send(message).await.is_err() {
                    break;
                }
            }
        });

        loop {
            match reader.next().await {
                Some(Ok(line)) => {
                    session.touch().await;

                    if line.starts_with("PROXY") && self.tcp_proxy_protocol {
                        debug!("ignoring PROXY protocol preface from {addr}");
                        continue;
                    }

                    match serde_json::from_str::<StratumRequest>(&line) {
                        Ok(request) => {
                            if let Err(e) = self.dispatch(&session, addr, request).await {
                                warn!("error handling request from {addr}: {e}");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("malformed stratum request from {addr}: {e}");
                            break;
                        }
                    }
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!("socket flooded: {addr} exceeded {MAX_LINE_LENGTH} bytes without a newline");
                    break;
                }
                Some(Err(e)) => {
                    warn!("error reading from {addr}: {e}");
                    break;
                }
                None => break,
            }
        }

        info!("stratum connection closed: {addr}");
        self.sessions.write().await.remove(&addr);
        writer_task.abort();
    }

    async fn dispatch(
        &self,
        session: &Arc<StratumSession>,
        addr: SocketAddr,
        request: StratumRequest,
    ) -> Result<(), crate::errors::SessionError> {
        let ip = addr.ip().to_string();
        let id = request.id;

        match request.method.as_str() {
            "mining.subscribe" => session.handle_subscribe(id, self.job_source.as_ref()).await,
            "mining.authorize" => {
                session
                    .handle_authorize(id, &request.params, &ip, self.authorizer.as_ref(), self.job_source.as_ref())
                    .await
            }
            "mining.submit" => {
                let outcome = session
                    .handle_submit(id, &request.params, &ip, self.job_source.as_ref())
                    .await?;
                if let Some(share) = outcome {
                    (self.share_sink)(share);
                }
                Ok(())
            }
            "mining.get_transactions" => session.handle_get_transactions(id).await,
            "mining.extranonce.subscribe" => session.handle_extranonce_subscribe(id).await,
            other => session.handle_unknown_method(id, other).await,
        }
    }

    /// `broadcastMiningJobs`: pushes `jobParams` to every connected client,
    /// in registry iteration order (unspecified, per spec §5).
    pub async fn broadcast_job(&self, job_params: Value) {
        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            if let Err(e) = session.send_mining_job(job_params.clone()).await {
                debug!("closing idle/broken session {}: {e}", session.addr);
                self.sessions.write().await.remove(&session.addr);
            }
        }
    }

    pub async fn connected_clients(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Applies a VarDiff-issued retarget to the named worker's session, if
    /// still connected. The change is picked up at that session's next
    /// `mining.notify` (spec §4.5).
    pub async fn set_pending_difficulty(&self, worker: &str, new_diff: f64) {
        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            if session.worker_name().await == worker {
                session.set_pending_difficulty(new_diff).await;
                break;
            }
        }
    }
}
