//! In-process transport for simulations and tests.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{BoxFuture, SendStatus, Transport};
use crate::address::PeerAddress;
use crate::engine::GossipEngine;
use crate::error::GossipError;

/// One outbound request observed by a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct SendRecord {
    /// Sending node.
    pub from: PeerAddress,
    /// Target node.
    pub to: PeerAddress,
    /// Serialized envelope.
    pub body: Vec<u8>,
    /// Whether the request reached the target's inbox.
    pub delivered: bool,
}

#[derive(Debug, Default)]
struct NetworkInner {
    inboxes: HashMap<PeerAddress, mpsc::UnboundedSender<Vec<u8>>>,
    offline: HashSet<PeerAddress>,
    log: Vec<SendRecord>,
}

/// A switchboard connecting [`MemoryTransport`] endpoints by onion address.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new endpoint under a random address.
    ///
    /// Returns the transport for the node and the receiver its inbound bodies arrive on.
    #[must_use]
    pub fn endpoint(&self) -> (MemoryTransport, mpsc::UnboundedReceiver<Vec<u8>>) {
        self.endpoint_at(PeerAddress::random())
    }

    /// Registers a new endpoint under `address`, replacing any previous one.
    #[must_use]
    pub fn endpoint_at(
        &self,
        address: PeerAddress,
    ) -> (MemoryTransport, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().inboxes.insert(address.clone(), tx);
        let transport = MemoryTransport {
            address,
            network: self.clone(),
        };
        (transport, rx)
    }

    /// Makes every request to `address` answer 503 until brought back online.
    pub fn set_offline(&self, address: &PeerAddress, offline: bool) {
        let mut inner = self.inner.lock();
        if offline {
            inner.offline.insert(address.clone());
        } else {
            inner.offline.remove(address);
        }
    }

    /// Returns every request made so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<SendRecord> {
        self.inner.lock().log.clone()
    }

    /// Returns the requests addressed to `to`.
    #[must_use]
    pub fn sent_to(&self, to: &PeerAddress) -> Vec<SendRecord> {
        self.inner
            .lock()
            .log
            .iter()
            .filter(|r| &r.to == to)
            .cloned()
            .collect()
    }

    /// Returns the requests made by `from`.
    #[must_use]
    pub fn sent_from(&self, from: &PeerAddress) -> Vec<SendRecord> {
        self.inner
            .lock()
            .log
            .iter()
            .filter(|r| &r.from == from)
            .cloned()
            .collect()
    }

    fn route(
        &self,
        from: &PeerAddress,
        to: &PeerAddress,
        body: Vec<u8>,
    ) -> Result<SendStatus, GossipError> {
        let mut inner = self.inner.lock();

        let result = if inner.offline.contains(to) {
            Ok(SendStatus::UNAVAILABLE)
        } else {
            match inner.inboxes.get(to) {
                Some(inbox) => inbox
                    .send(body.clone())
                    .map(|()| SendStatus::OK)
                    .map_err(|_| GossipError::Transport(format!("{to} stopped listening"))),
                None => Err(GossipError::Transport(format!("no route to {to}"))),
            }
        };

        inner.log.push(SendRecord {
            from: from.clone(),
            to: to.clone(),
            body,
            delivered: matches!(result, Ok(status) if status.is_success()),
        });
        result
    }
}

/// A node's handle onto a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    address: PeerAddress,
    network: MemoryNetwork,
}

impl MemoryTransport {
    /// Returns the address this endpoint is registered under.
    #[must_use]
    pub const fn address(&self) -> &PeerAddress {
        &self.address
    }
}

impl Transport for MemoryTransport {
    fn local_address(&self) -> BoxFuture<'_, Result<String, GossipError>> {
        Box::pin(async move { Ok(self.address.to_string()) })
    }

    fn send_envelope<'a>(
        &'a self,
        address: &'a PeerAddress,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<SendStatus, GossipError>> {
        Box::pin(async move { self.network.route(&self.address, address, body) })
    }
}

/// Feeds every body arriving on `inbox` into `engine`, playing the receive server.
pub fn serve(
    engine: Arc<GossipEngine>,
    mut inbox: mpsc::UnboundedReceiver<Vec<u8>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(body) = inbox.recv().await {
            let _ack = engine.on_envelope_received(&body);
        }
    })
}
