//! The gossip engine.
//!
//! This module provides the node-facing interface:
//! - [`GossipEngine`]: lifecycle, publish, ingest and fanout
//! - [`NodeState`]: Stopped → Starting → Running → Stopped
//! - [`EngineStats`]: per-session counters
//!
//! Each run of the node lives in its own session (address, identity, dedup index, peer
//! book). Stopping drops the session and starting builds a new one, so nothing carries over
//! between runs. Fanout sends are detached tasks that keep their own handle on the session
//! they were started from.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::address::{PeerAddress, sanitize};
use crate::config::GossipConfig;
use crate::dedup::SeenSet;
use crate::envelope::Envelope;
use crate::error::GossipError;
use crate::events::{EventBus, LogLine};
use crate::identity::Identity;
use crate::peers::PeerBook;
use crate::transport::{Ack, Transport};

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Not participating in gossip.
    Stopped,
    /// Waiting for the transport to report the node's own address.
    Starting,
    /// Publishing, ingesting and forwarding.
    Running,
}

impl NodeState {
    /// Returns true if the node can process gossip messages.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// What happened to an inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Already seen; dropped without side effects.
    Duplicate,
    /// Signature did not verify; dropped without side effects.
    Rejected,
    /// Delivered to subscribers and forwarded.
    Delivered,
    /// Handshake; forwarded but not delivered.
    Handshake,
}

/// Counters for the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Envelopes published by this node.
    pub published: u64,
    /// Envelopes delivered to subscribers.
    pub delivered: u64,
    /// Inbound envelopes dropped as already seen.
    pub duplicates: u64,
    /// Inbound envelopes dropped as malformed or forged.
    pub rejected: u64,
    /// Sends that eventually succeeded.
    pub sends_succeeded: u64,
    /// Sends abandoned after exhausting every attempt.
    pub sends_failed: u64,
    /// Peers evicted for repeated failures.
    pub peers_evicted: u64,
}

/// State owned by one run of the node.
struct Session {
    address: PeerAddress,
    identity: Identity,
    seen: Mutex<SeenSet>,
    peers: Mutex<PeerBook>,
    stats: Mutex<EngineStats>,
    runtime: Handle,
}

enum Lifecycle {
    Stopped,
    /// Waiting on the start attempt with this ticket.
    Starting(u64),
    Running(Arc<Session>),
}

impl Lifecycle {
    const fn state(&self) -> NodeState {
        match self {
            Self::Stopped => NodeState::Stopped,
            Self::Starting(_) => NodeState::Starting,
            Self::Running(_) => NodeState::Running,
        }
    }
}

/// Retry policy for one peer on one hop.
#[derive(Debug, Clone, Copy)]
struct SendPolicy {
    attempts: u32,
    backoff: Duration,
    timeout: Duration,
}

/// Everything a detached send task needs.
#[derive(Clone)]
struct Courier {
    transport: Arc<dyn Transport>,
    events: EventBus,
    policy: SendPolicy,
}

impl Courier {
    /// Makes a single bounded attempt.
    async fn attempt(&self, peer: &PeerAddress, body: Vec<u8>) -> Result<(), GossipError> {
        let send = self.transport.send_envelope(peer, body);
        match tokio::time::timeout(self.policy.timeout, send).await {
            Ok(Ok(status)) if status.is_success() => Ok(()),
            Ok(Ok(status)) => Err(GossipError::Transport(format!(
                "peer answered with status {}",
                status.0
            ))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(GossipError::Transport(format!(
                "no answer within {:?}",
                self.policy.timeout
            ))),
        }
    }

    /// Delivers `body` to `peer`, retrying up to the policy ceiling.
    ///
    /// Success forgives the peer's failures; exhaustion counts one failure against it.
    async fn send_to_peer(
        &self,
        session: &Session,
        peer: &PeerAddress,
        id: &str,
        body: Vec<u8>,
    ) -> bool {
        let attempts = self.policy.attempts.max(1);

        for attempt in 1..=attempts {
            match self.attempt(peer, body.clone()).await {
                Ok(()) => {
                    session.peers.lock().report_success(peer);
                    session.stats.lock().sends_succeeded += 1;
                    self.events
                        .debug(format!("sent {id} to {peer} (attempt {attempt}/{attempts})"));
                    return true;
                }
                Err(e) => {
                    self.events.debug(format!(
                        "send of {id} to {peer} failed (attempt {attempt}/{attempts}): {e}"
                    ));
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                }
            }
        }

        let evicted = session.peers.lock().report_failure(peer);
        {
            let mut stats = session.stats.lock();
            stats.sends_failed += 1;
            if evicted {
                stats.peers_evicted += 1;
            }
        }
        self.events
            .warn(format!("gave up sending {id} to {peer} after {attempts} attempts"));
        if evicted {
            self.events
                .warn(format!("evicted peer {peer} after repeated failures"));
        }
        false
    }
}

/// A node participating in flood gossip.
///
/// Operations other than [`start`](Self::start) and the read-only accessors fail with
/// [`GossipError::NotStarted`] unless the node is [`NodeState::Running`].
pub struct GossipEngine {
    config: GossipConfig,
    transport: Arc<dyn Transport>,
    lifecycle: Mutex<Lifecycle>,
    start_tickets: AtomicU64,
    events: EventBus,
}

impl fmt::Debug for GossipEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GossipEngine")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl GossipEngine {
    /// Creates a stopped engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn new(config: GossipConfig, transport: Arc<dyn Transport>) -> Result<Self, GossipError> {
        config.validate()?;
        let events = EventBus::new(config.event_buffer);
        Ok(Self {
            config,
            transport,
            lifecycle: Mutex::new(Lifecycle::Stopped),
            start_tickets: AtomicU64::new(0),
            events,
        })
    }

    /// Returns the engine configuration.
    #[must_use]
    pub const fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> NodeState {
        self.lifecycle.lock().state()
    }

    /// Returns the node's own address while running.
    #[must_use]
    pub fn local_address(&self) -> Option<PeerAddress> {
        self.session().ok().map(|s| s.address.clone())
    }

    /// Returns the current identity's public key (hex) while running.
    #[must_use]
    pub fn public_key(&self) -> Option<String> {
        self.session().ok().map(|s| s.identity.public_key())
    }

    /// Subscribes to verified, non-handshake inbound envelopes.
    #[must_use]
    pub fn subscribe_messages(&self) -> broadcast::Receiver<Envelope> {
        self.events.subscribe_messages()
    }

    /// Subscribes to diagnostic log lines.
    #[must_use]
    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogLine> {
        self.events.subscribe_logs()
    }

    /// Starts the node, waiting for the transport to report its own address.
    ///
    /// A fresh identity, an empty dedup index and a peer book holding only the configured
    /// bootstrap peers are created on every start.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::AlreadyStarted`] if not stopped, the transport's error if the
    /// address is unavailable, [`GossipError::Config`] if the address is malformed, and
    /// [`GossipError::NotStarted`] if [`stop`](Self::stop) was called meanwhile. A start
    /// cancelled by `stop` never installs its session, even if a later start is pending.
    pub async fn start(&self) -> Result<PeerAddress, GossipError> {
        let ticket = self.start_tickets.fetch_add(1, Ordering::Relaxed);
        {
            let mut lifecycle = self.lifecycle.lock();
            if !matches!(*lifecycle, Lifecycle::Stopped) {
                return Err(GossipError::AlreadyStarted);
            }
            *lifecycle = Lifecycle::Starting(ticket);
        }
        self.events.info("starting node, waiting for own address");

        let address = match self.resolve_own_address().await {
            Ok(address) => address,
            Err(e) => {
                let mut lifecycle = self.lifecycle.lock();
                if matches!(*lifecycle, Lifecycle::Starting(t) if t == ticket) {
                    *lifecycle = Lifecycle::Stopped;
                }
                drop(lifecycle);
                self.events.warn(format!("start failed: {e}"));
                return Err(e);
            }
        };

        let session = Arc::new(self.new_session(address.clone()));
        let bootstrap_count = session.peers.lock().len();

        {
            let mut lifecycle = self.lifecycle.lock();
            if !matches!(*lifecycle, Lifecycle::Starting(t) if t == ticket) {
                return Err(GossipError::NotStarted);
            }
            *lifecycle = Lifecycle::Running(session);
        }

        self.events.info(format!(
            "node running at {address} with {bootstrap_count} bootstrap peers"
        ));
        Ok(address)
    }

    /// Stops the node. In-flight sends are left to finish or fail on their own.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped);
        if let Lifecycle::Running(session) = previous {
            self.events.info(format!("node at {} stopped", session.address));
        }
    }

    /// Builds, signs and floods a new envelope, returning it.
    ///
    /// The id is marked seen before any send, so an echo from a peer is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::NotStarted`] unless running. Unreachable peers never fail
    /// a publish.
    pub fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<String>,
    ) -> Result<Envelope, GossipError> {
        let session = self.session()?;
        let envelope = Envelope::signed(topic, payload, &session.address, &session.identity);

        session.seen.lock().mark_seen(envelope.id());
        session.stats.lock().published += 1;

        let targets = self.fan_out(&session, &envelope);
        self.events.debug(format!(
            "published {} on '{}' to {targets} peers",
            envelope.id(),
            envelope.topic()
        ));
        Ok(envelope)
    }

    /// Adds `address` and sends it a handshake directly, bypassing fanout sampling.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::NotStarted`] unless running,
    /// [`GossipError::InvalidAddress`] for malformed input or the node's own address, and the
    /// transport error if the single send fails.
    pub async fn ping_peer(&self, address: &str) -> Result<(), GossipError> {
        let session = self.session()?;
        let peer = sanitize(address)
            .filter(|p| *p != session.address)
            .ok_or_else(|| GossipError::InvalidAddress(address.to_string()))?;

        let discovered = session.peers.lock().insert(peer.clone());
        if discovered {
            self.events.info(format!("peer discovered: {peer}"));
        }

        let handshake = Envelope::handshake(&session.address, &session.identity);
        session.seen.lock().mark_seen(handshake.id());
        let body = handshake.encode()?;

        match self.courier().attempt(&peer, body).await {
            Ok(()) => {
                session.peers.lock().report_success(&peer);
                self.events.info(format!("handshake delivered to {peer}"));
                Ok(())
            }
            Err(e) => {
                let evicted = session.peers.lock().report_failure(&peer);
                if evicted {
                    session.stats.lock().peers_evicted += 1;
                }
                self.events.warn(format!("handshake to {peer} failed: {e}"));
                Err(e)
            }
        }
    }

    /// Adds a peer, returning whether it was new.
    ///
    /// Malformed addresses and the node's own address are not added.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::NotStarted`] unless running.
    pub fn add_peer(&self, address: &str) -> Result<bool, GossipError> {
        let session = self.session()?;
        let Some(peer) = sanitize(address) else {
            self.events.warn(format!("ignored invalid peer address '{address}'"));
            return Ok(false);
        };
        if peer == session.address {
            return Ok(false);
        }

        let added = session.peers.lock().insert(peer.clone());
        if added {
            self.events.info(format!("peer discovered: {peer}"));
        }
        Ok(added)
    }

    /// Removes a peer, returning whether it was known.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::NotStarted`] unless running.
    pub fn remove_peer(&self, address: &str) -> Result<bool, GossipError> {
        let session = self.session()?;
        let removed = session.peers.lock().remove_peer(address);
        if removed {
            self.events.info(format!("peer removed: {address}"));
        }
        Ok(removed)
    }

    /// Returns the known peers, sorted. Empty unless running.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerAddress> {
        self.session()
            .map(|s| s.peers.lock().snapshot())
            .unwrap_or_default()
    }

    /// Returns the session counters. Zero unless running.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.session()
            .map(|s| s.stats.lock().clone())
            .unwrap_or_default()
    }

    /// Inbound hook for the receive server. Always acknowledges immediately.
    pub fn on_envelope_received(&self, body: &[u8]) -> Ack {
        match Envelope::decode(body) {
            Ok(envelope) => {
                if let Err(e) = self.ingest(envelope) {
                    self.events.debug(format!("inbound envelope ignored: {e}"));
                }
            }
            Err(e) => {
                if let Ok(session) = self.session() {
                    session.stats.lock().rejected += 1;
                }
                self.events.warn(format!("dropped inbound envelope: {e}"));
            }
        }
        Ack
    }

    /// Processes an inbound envelope: dedup, verify, discover, deliver, forward.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::NotStarted`] unless running.
    pub fn ingest(&self, envelope: Envelope) -> Result<IngestOutcome, GossipError> {
        let session = self.session()?;

        let duplicate = session.seen.lock().is_duplicate(envelope.id());
        if duplicate {
            session.stats.lock().duplicates += 1;
            return Ok(IngestOutcome::Duplicate);
        }

        if !Identity::verify(&envelope) {
            session.stats.lock().rejected += 1;
            let err = GossipError::Authentication(format!(
                "envelope {} claiming origin '{}' failed signature verification",
                envelope.id(),
                envelope.origin()
            ));
            self.events.security(format!("dropped inbound envelope: {err}"));
            return Ok(IngestOutcome::Rejected);
        }

        // A concurrent ingest of the same id may have won since the check above.
        let first_sighting = session.seen.lock().mark_seen(envelope.id());
        if !first_sighting {
            session.stats.lock().duplicates += 1;
            return Ok(IngestOutcome::Duplicate);
        }

        self.discover_origin(&session, &envelope);

        let outcome = if envelope.is_handshake() {
            self.events
                .debug(format!("handshake {} from {}", envelope.id(), envelope.origin()));
            IngestOutcome::Handshake
        } else {
            session.stats.lock().delivered += 1;
            self.events.info(format!(
                "delivered {} on '{}' from {}",
                envelope.id(),
                envelope.topic(),
                envelope.origin()
            ));
            self.events.deliver(envelope.clone());
            IngestOutcome::Delivered
        };

        self.fan_out(&session, &envelope);
        Ok(outcome)
    }

    /// Forwards `envelope` to up to `fanout` random peers, excluding its origin and this
    /// node. Returns the number of sends launched.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::NotStarted`] unless running.
    pub fn gossip_to_peers(&self, envelope: &Envelope) -> Result<usize, GossipError> {
        let session = self.session()?;
        Ok(self.fan_out(&session, envelope))
    }

    /// Sends `envelope` to one peer with retries, resolving once it succeeds or gives up.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::NotStarted`] unless running, or a format error if the
    /// envelope cannot be serialized.
    pub async fn send_to_peer(
        &self,
        peer: &PeerAddress,
        envelope: &Envelope,
    ) -> Result<bool, GossipError> {
        let session = self.session()?;
        let body = envelope.encode()?;
        Ok(self
            .courier()
            .send_to_peer(&session, peer, envelope.id(), body)
            .await)
    }

    fn session(&self) -> Result<Arc<Session>, GossipError> {
        match &*self.lifecycle.lock() {
            Lifecycle::Running(session) => Ok(Arc::clone(session)),
            Lifecycle::Stopped | Lifecycle::Starting(_) => Err(GossipError::NotStarted),
        }
    }

    async fn resolve_own_address(&self) -> Result<PeerAddress, GossipError> {
        let raw = self.transport.local_address().await?;
        sanitize(&raw).ok_or_else(|| {
            GossipError::Config(format!("transport reported invalid own address '{raw}'"))
        })
    }

    fn new_session(&self, address: PeerAddress) -> Session {
        // Bootstrap entries were checked by `GossipConfig::validate` in `new`.
        let mut peers = PeerBook::new(self.config.failure_threshold);
        for peer in self.config.bootstrap_peers.iter().filter_map(|p| sanitize(p)) {
            if peer != address {
                peers.insert(peer);
            }
        }

        Session {
            address,
            identity: Identity::generate(),
            seen: Mutex::new(SeenSet::new(self.config.dedup_capacity)),
            peers: Mutex::new(peers),
            stats: Mutex::new(EngineStats::default()),
            runtime: Handle::current(),
        }
    }

    fn courier(&self) -> Courier {
        Courier {
            transport: Arc::clone(&self.transport),
            events: self.events.clone(),
            policy: SendPolicy {
                attempts: self.config.max_send_attempts,
                backoff: self.config.retry_backoff(),
                timeout: self.config.request_timeout(),
            },
        }
    }

    fn discover_origin(&self, session: &Session, envelope: &Envelope) {
        match sanitize(envelope.origin()) {
            Some(origin) if origin == session.address => {}
            Some(origin) => {
                let added = session.peers.lock().insert(origin.clone());
                if added {
                    self.events.info(format!("peer discovered: {origin}"));
                }
            }
            None => self.events.warn(format!(
                "envelope {} has invalid origin '{}', peer not registered",
                envelope.id(),
                envelope.origin()
            )),
        }
    }

    fn fan_out(&self, session: &Arc<Session>, envelope: &Envelope) -> usize {
        let targets = session.peers.lock().random_peers(
            self.config.fanout,
            &[envelope.origin(), session.address.as_str()],
        );
        if targets.is_empty() {
            self.events
                .debug(format!("no peers to forward {} to", envelope.id()));
            return 0;
        }

        let body = match envelope.encode() {
            Ok(body) => body,
            Err(e) => {
                self.events
                    .warn(format!("cannot forward {}: {e}", envelope.id()));
                return 0;
            }
        };

        let courier = self.courier();
        let count = targets.len();
        for peer in targets {
            let courier = courier.clone();
            let session = Arc::clone(session);
            let id = envelope.id().to_string();
            let body = body.clone();
            let runtime = session.runtime.clone();
            runtime.spawn(async move {
                courier.send_to_peer(&session, &peer, &id, body).await;
            });
        }
        count
    }
}
