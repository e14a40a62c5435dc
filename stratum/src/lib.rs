//! Stratum wire framing, per-connection client state machine, and the
//! listening server (spec §4.4).

pub mod errors;
pub mod server;
pub mod session;
pub mod subscription;
pub mod target;

pub use errors::{SessionError, StratumWireError};
pub use server::{PortConfig, ShareSink, StratumServer};
pub use session::{AlwaysAuthorize, AuthorizeResult, Authorizer, JobSource, SessionConfig, StratumSession};
pub use subscription::SubscriptionCounter;
pub use target::target_hex_for_difficulty;
