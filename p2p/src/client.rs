//! The peer client itself: one outbound connection, the version/verack
//! handshake, and the `ping`/`inv` event loop (spec §4.6).

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::errors::PeerError;
use crate::message::{
    decode_inv, encode_message, encode_version, read_message, InvType, VersionFields, CMD_INV,
    CMD_PING, CMD_PONG, CMD_VERACK, CMD_VERSION,
};

/// `NODE_NETWORK` service bit (BIP 111 / the original service flags table).
const NODE_NETWORK: u64 = 1;
const PROTOCOL_VERSION: i32 = 170_002;
const USER_AGENT: &str = "komodo-solomining";

/// Events the client surfaces to its caller (spec §4.6).
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// `verack` was received: the handshake completed.
    Connected,
    /// An `inv` entry of type `block` arrived, carrying its display-order
    /// hex hash.
    BlockFound(String),
    /// The connection closed before a `verack` was ever seen.
    ConnectionRejected,
}

pub type PeerEventSink = Arc<dyn Fn(PeerEvent) + Send + Sync>;

/// Configuration for one peer connection (spec §6, `options.p2p`).
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub host: String,
    pub port: u16,
    pub magic: u32,
    /// Reconnect delay after a connection that completed its handshake
    /// closes unexpectedly.
    pub reconnect_delay: Duration,
}

/// Drives one peer connection, reconnecting automatically as long as the
/// remote side has previously completed the handshake.
pub struct PeerClient {
    config: PeerConfig,
    sink: PeerEventSink,
}

impl PeerClient {
    pub fn new(config: PeerConfig, sink: PeerEventSink) -> Self {
        Self { config, sink }
    }

    /// Runs the connect/handshake/event loop forever, reconnecting after any
    /// post-handshake disconnect. Returns only if the very first handshake
    /// is rejected (no `verack` before close) — the caller decides whether
    /// that is fatal.
    pub async fn run(&self) -> Result<(), PeerError> {
        loop {
            match self.connect_once().await {
                Ok(()) => {
                    info!(
                        "p2p peer {}:{} disconnected after a clean handshake, reconnecting",
                        self.config.host, self.config.port
                    );
                    tokio::time::sleep(self.config.reconnect_delay).await;
                }
                Err(PeerError::ConnectionRejected) => {
                    (self.sink)(PeerEvent::ConnectionRejected);
                    return Err(PeerError::ConnectionRejected);
                }
                Err(err) => {
                    warn!(
                        "p2p peer {}:{} connection error: {err}",
                        self.config.host, self.config.port
                    );
                    tokio::time::sleep(self.config.reconnect_delay).await;
                }
            }
        }
    }

    /// One connection's full lifetime: connect, handshake, then the
    /// read/respond loop until the socket closes.
    async fn connect_once(&self) -> Result<(), PeerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let mut stream = TcpStream::connect(&addr).await?;
        debug!("p2p connected to {addr}");

        self.send_version(&mut stream).await?;

        let mut buf = BytesMut::new();
        let mut verack_seen = false;

        loop {
            let msg = match read_message(&mut stream, &mut buf, self.config.magic).await {
                Ok(msg) => msg,
                Err(_) if !verack_seen => return Err(PeerError::ConnectionRejected),
                // The connection closed after a successful handshake; the
                // caller's `run` loop treats this as reconnect-worthy, not
                // fatal.
                Err(_) => return Ok(()),
            };

            match msg.command.as_str() {
                CMD_VERACK => {
                    verack_seen = true;
                    (self.sink)(PeerEvent::Connected);
                }
                CMD_PING => {
                    let pong = encode_message(self.config.magic, CMD_PONG, &msg.payload);
                    stream.write_all(&pong).await?;
                }
                CMD_INV => {
                    if let Some(entries) = decode_inv(&msg.payload) {
                        for entry in entries {
                            if entry.inv_type == InvType::Block {
                                (self.sink)(PeerEvent::BlockFound(entry.hash_hex));
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    async fn send_version(&self, stream: &mut TcpStream) -> Result<(), PeerError> {
        let fields = VersionFields {
            protocol_version: PROTOCOL_VERSION,
            services: NODE_NETWORK,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64,
            nonce: rand::random(),
            user_agent: USER_AGENT.to_string(),
            start_height: 0,
            relay: false,
        };
        let payload = encode_version(&fields);
        let msg = encode_message(self.config.magic, CMD_VERSION, &payload);
        stream.write_all(&msg).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    fn sink_collecting(events: Arc<Mutex<Vec<PeerEvent>>>) -> PeerEventSink {
        Arc::new(move |event| events.lock().unwrap().push(event))
    }

    #[tokio::test]
    async fn handshake_emits_connected_on_verack() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let magic = 0xFEB4_CAFEu32;

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Drain the version message.
            let mut buf = BytesMut::new();
            let _ = read_message(&mut socket, &mut buf, magic).await.unwrap();
            let verack = encode_message(magic, CMD_VERACK, &[]);
            socket.write_all(&verack).await.unwrap();
            // Keep the socket open briefly so the client's read loop
            // observes the verack before we drop it.
            tokio::time::sleep(Duration::from_millis(50)).await;
        });

        let events = Arc::new(Mutex::new(Vec::new()));
        let client = PeerClient::new(
            PeerConfig {
                host: addr.ip().to_string(),
                port: addr.port(),
                magic,
                reconnect_delay: Duration::from_millis(10),
            },
            sink_collecting(events.clone()),
        );

        let _ = tokio::time::timeout(Duration::from_millis(500), client.connect_once()).await;
        server.await.unwrap();

        let recorded = events.lock().unwrap();
        assert!(matches!(recorded.first(), Some(PeerEvent::Connected)));
    }

    #[tokio::test]
    async fn close_before_verack_is_connection_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let magic = 0xFEB4_CAFEu32;

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let events = Arc::new(Mutex::new(Vec::new()));
        let client = PeerClient::new(
            PeerConfig {
                host: addr.ip().to_string(),
                port: addr.port(),
                magic,
                reconnect_delay: Duration::from_millis(10),
            },
            sink_collecting(events),
        );

        let result = client.connect_once().await;
        assert!(matches!(result, Err(PeerError::ConnectionRejected)));
    }
}
