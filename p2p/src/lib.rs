//! Minimal Bitcoin-wire P2P client (spec §4.6): the optional fast path that
//! learns about new blocks from the network instead of waiting on the next
//! `getblocktemplate` poll.

pub mod client;
pub mod errors;
pub mod message;

pub use client::{PeerClient, PeerConfig, PeerEvent, PeerEventSink};
pub use errors::{MessageError, PeerError};
