//! Error types for onion-gossip.

use thiserror::Error;

/// Errors that can occur in gossip operations.
#[derive(Debug, Error)]
pub enum GossipError {
    /// The node has not finished starting (or was stopped).
    #[error("gossip node is not started")]
    NotStarted,

    /// `start` was called while the node was already starting or running.
    #[error("gossip node is already started")]
    AlreadyStarted,

    /// Input could not be canonicalized into an onion address.
    #[error("invalid peer address: {0}")]
    InvalidAddress(String),

    /// Malformed wire envelope.
    #[error("malformed envelope: {0}")]
    Format(String),

    /// Envelope signature did not verify.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Outbound send failed (error, timeout or non-success status).
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
