//! Wire-level and session-level error kinds (spec §7, Stratum half).

use thiserror::Error;

/// Numbered errors the server can send back to a miner as `[code, message,
/// null]`, beyond the share-validation codes `equisolo_jobmanager::ShareError`
/// already owns.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StratumWireError {
    #[error("unauthorized worker")]
    UnauthorizedWorker,

    #[error("not subscribed")]
    NotSubscribed,

    #[error("not supported")]
    NotSupported,
}

impl StratumWireError {
    pub fn code(self) -> i32 {
        match self {
            StratumWireError::UnauthorizedWorker => 24,
            StratumWireError::NotSubscribed => 25,
            StratumWireError::NotSupported => 20,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            StratumWireError::UnauthorizedWorker => "unauthorized worker",
            StratumWireError::NotSubscribed => "not subscribed",
            StratumWireError::NotSupported => "Not supported.",
        }
    }
}

/// Connection-level faults that close the socket without a wire reply.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("socket flooded: buffered input exceeded 10 KiB without a newline")]
    SocketFlooded,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
