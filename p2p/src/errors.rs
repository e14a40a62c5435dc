//! Error types for wire framing and peer connection handling.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload too large: {0} bytes")]
    TooLarge(usize),
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection rejected: no verack received before close")]
    ConnectionRejected,

    #[error("message error: {0}")]
    Message(#[from] MessageError),
}
