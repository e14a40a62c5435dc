//! Orchestrator-level error kinds (spec §7, "pool orchestrator" half).
//!
//! Startup-phase variants (`Config`, `NoDaemonOnline`) are fatal: the
//! process exits non-zero and expects a supervisor to restart it (spec §7,
//! "Startup-phase errors...are fatal"). The rest surface as logged warnings
//! inside the running event loop.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no configured daemon is reachable")]
    NoDaemonOnline,

    #[error("daemon error: {0}")]
    Daemon(#[from] equisolo_daemon::DaemonError),

    #[error("template is missing a required field: {0}")]
    TemplateMissingFields(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
