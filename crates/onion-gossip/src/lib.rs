//! # onion-gossip
//!
//! Signed flood gossip between peers addressed by onion v3 hostnames.
//!
//! This crate provides:
//!
//! - A JSON envelope format carrying an Ed25519 signature over its content
//! - Bounded FIFO deduplication of envelope ids
//! - A peer book with random fanout selection and failure-based eviction
//! - A gossip engine that publishes, verifies, delivers and re-floods envelopes
//! - An in-process transport for simulations and tests
//!
//! ## Core Types
//!
//! - [`GossipEngine`]: A node's lifecycle and message handling
//! - [`Envelope`]: The unit of gossip
//! - [`Identity`]: Per-session signing key
//! - [`PeerAddress`]: A canonical onion v3 address
//! - [`Transport`]: Seam to the anonymity-layer client

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod events;
pub mod identity;
pub mod peers;
pub mod transport;

pub use address::{PeerAddress, sanitize};
pub use config::GossipConfig;
pub use dedup::{DEFAULT_DEDUP_CAPACITY, SeenSet};
pub use engine::{EngineStats, GossipEngine, IngestOutcome, NodeState};
pub use envelope::{Envelope, HANDSHAKE_TOPIC};
pub use error::GossipError;
pub use events::{LogLevel, LogLine};
pub use identity::Identity;
pub use peers::{DEFAULT_FAILURE_THRESHOLD, PeerBook};
pub use transport::{
    Ack, BoxFuture, MemoryNetwork, MemoryTransport, SendRecord, SendStatus, Transport, serve,
};
