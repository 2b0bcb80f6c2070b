//! Gossip envelopes and their JSON wire form.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::PeerAddress;
use crate::error::GossipError;
use crate::identity::Identity;

/// Topic reserved for reachability probes. Handshakes propagate but are never delivered.
pub const HANDSHAKE_TOPIC: &str = "handshake";

/// A signed, self-contained gossip unit.
///
/// The wire form is a flat JSON object:
///
/// ```text
/// { "id", "origin", "topic", "payload", "timestamp", "senderPub", "signature" }
/// ```
///
/// `senderPub` and `signature` may be missing on the wire; they then decode as empty
/// strings and fail verification later instead of failing the parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub(crate) id: String,
    pub(crate) origin: String,
    pub(crate) topic: String,
    pub(crate) payload: String,
    pub(crate) timestamp: i64,
    #[serde(default)]
    pub(crate) sender_pub: String,
    #[serde(default)]
    pub(crate) signature: String,
}

impl Envelope {
    /// Builds and signs a fresh envelope with a random id and the current time.
    #[must_use]
    pub fn signed(
        topic: impl Into<String>,
        payload: impl Into<String>,
        origin: &PeerAddress,
        identity: &Identity,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        let topic = topic.into();
        let payload = payload.into();
        let timestamp = Utc::now().timestamp_millis();
        let signature = identity.sign(&id, &topic, &payload, timestamp);

        Self {
            id,
            origin: origin.to_string(),
            topic,
            payload,
            timestamp,
            sender_pub: identity.public_key(),
            signature,
        }
    }

    /// Builds a signed zero-payload handshake envelope.
    #[must_use]
    pub fn handshake(origin: &PeerAddress, identity: &Identity) -> Self {
        Self::signed(HANDSHAKE_TOPIC, "", origin, identity)
    }

    /// Parses an envelope from its wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::Format`] if the body is not JSON or a required field
    /// (`id`, `origin`, `topic`, `payload`, `timestamp`) is missing or mistyped.
    pub fn decode(bytes: &[u8]) -> Result<Self, GossipError> {
        serde_json::from_slice(bytes).map_err(|e| GossipError::Format(e.to_string()))
    }

    /// Serializes the envelope to its wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::Format`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, GossipError> {
        serde_json::to_vec(self).map_err(|e| GossipError::Format(e.to_string()))
    }

    /// Returns the globally unique message id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the origin address exactly as declared by the sender.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Returns the topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Returns the creation time in milliseconds since the Unix epoch.
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Returns the sender's public key as hex.
    #[must_use]
    pub fn sender_pub(&self) -> &str {
        &self.sender_pub
    }

    /// Returns the signature as hex.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Returns true for handshake control envelopes.
    #[must_use]
    pub fn is_handshake(&self) -> bool {
        self.topic == HANDSHAKE_TOPIC
    }
}
