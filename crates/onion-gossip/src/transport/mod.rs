//! Outbound transport seam.
//!
//! The engine never opens connections itself. It asks a [`Transport`] for the node's own
//! address once at start, and hands it serialized envelopes to deliver. A real deployment
//! backs this with a client tunnelled through the anonymity layer; [`MemoryNetwork`] backs
//! it with in-process channels.

mod memory;

pub use memory::{MemoryNetwork, MemoryTransport, SendRecord, serve};

use std::future::Future;
use std::pin::Pin;

use crate::address::PeerAddress;
use crate::error::GossipError;

/// Boxed future type for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Status returned by the remote receive server for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendStatus(pub u16);

impl SendStatus {
    /// The request was accepted.
    pub const OK: Self = Self(200);
    /// The remote end could not take the request.
    pub const UNAVAILABLE: Self = Self(503);

    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }
}

/// Acknowledgement returned to the receive server for every inbound request.
///
/// It is identical whether the envelope was delivered, deduplicated, malformed or forged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack;

/// Trait for the anonymity-layer client the engine sends through.
pub trait Transport: Send + Sync {
    /// Resolves the node's own address once the anonymity layer is up.
    ///
    /// # Errors
    ///
    /// Returns an error if the address can never become available.
    fn local_address(&self) -> BoxFuture<'_, Result<String, GossipError>>;

    /// Delivers one serialized envelope to `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be made. Non-success statuses are
    /// reported through `Ok` and treated the same way by the caller.
    fn send_envelope<'a>(
        &'a self,
        address: &'a PeerAddress,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<SendStatus, GossipError>>;
}
