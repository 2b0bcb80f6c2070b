//! Ephemeral node identity and envelope signatures.
//!
//! A node generates one Ed25519 keypair when it starts and drops it when it stops. Nothing
//! is persisted, so a restarted node is a new identity to the rest of the network.
//!
//! The signed message is the UTF-8 concatenation `id ‖ topic ‖ payload ‖ timestamp`, with the
//! timestamp rendered in base 10. Keys and signatures travel as lowercase hex.

use ed25519_dalek::{
    PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH, Signature, Signer, SigningKey, VerifyingKey,
};
use rand::rngs::OsRng;
use std::fmt;

use crate::envelope::Envelope;

/// The node's in-memory signing identity.
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generates a fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Returns the public key as lowercase hex.
    #[must_use]
    pub fn public_key(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Signs the envelope fields and returns the signature as lowercase hex.
    #[must_use]
    pub fn sign(&self, id: &str, topic: &str, payload: &str, timestamp: i64) -> String {
        let message = signing_message(id, topic, payload, timestamp);
        hex::encode(self.signing_key.sign(message.as_bytes()).to_bytes())
    }

    /// Verifies an envelope against the public key it declares.
    ///
    /// Every field is attacker-controlled, so malformed hex, wrong lengths and invalid
    /// curve points all come back as `false`.
    #[must_use]
    pub fn verify(envelope: &Envelope) -> bool {
        let Some(key) = decode_verifying_key(envelope.sender_pub()) else {
            return false;
        };
        let Some(signature) = decode_signature(envelope.signature()) else {
            return false;
        };

        let message = signing_message(
            envelope.id(),
            envelope.topic(),
            envelope.payload(),
            envelope.timestamp(),
        );
        key.verify_strict(message.as_bytes(), &signature).is_ok()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

fn signing_message(id: &str, topic: &str, payload: &str, timestamp: i64) -> String {
    format!("{id}{topic}{payload}{timestamp}")
}

fn decode_verifying_key(hex_key: &str) -> Option<VerifyingKey> {
    let bytes: [u8; PUBLIC_KEY_LENGTH] = hex::decode(hex_key).ok()?.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

fn decode_signature(hex_sig: &str) -> Option<Signature> {
    let bytes: [u8; SIGNATURE_LENGTH] = hex::decode(hex_sig).ok()?.try_into().ok()?;
    Some(Signature::from_bytes(&bytes))
}
