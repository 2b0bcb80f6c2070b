//! Engine configuration.
//!
//! Configuration is fixed for the life of an engine:
//! - Fanout and peer eviction thresholds
//! - Dedup capacity
//! - Send retry policy
//! - Bootstrap peers re-seeded on every start

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::address::sanitize;
use crate::dedup::DEFAULT_DEDUP_CAPACITY;
use crate::error::GossipError;
use crate::peers::DEFAULT_FAILURE_THRESHOLD;

/// Configuration for a gossip engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GossipConfig {
    /// Number of peers each hop forwards a message to.
    pub fanout: usize,
    /// Number of envelope ids remembered for deduplication.
    pub dedup_capacity: usize,
    /// Consecutive failed sends after which a peer is evicted.
    pub failure_threshold: u32,
    /// Total send attempts per peer per hop, including the first.
    pub max_send_attempts: u32,
    /// Pause between send attempts in milliseconds.
    pub retry_backoff_ms: u64,
    /// Upper bound on a single send attempt in milliseconds.
    pub request_timeout_ms: u64,
    /// Slots in each event stream before slow subscribers start lagging.
    pub event_buffer: usize,
    /// Peers the book is seeded with on every start.
    pub bootstrap_peers: Vec<String>,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            fanout: 3,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            max_send_attempts: 3,
            retry_backoff_ms: 5_000,
            request_timeout_ms: 30_000,
            event_buffer: 256,
            bootstrap_peers: Vec::new(),
        }
    }
}

impl GossipConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GossipError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GossipError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self, GossipError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| GossipError::Config(format!("invalid JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, GossipError> {
        serde_json::to_string_pretty(self).map_err(|e| GossipError::Config(e.to_string()))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is out of range or a bootstrap peer is malformed.
    pub fn validate(&self) -> Result<(), GossipError> {
        if self.fanout == 0 {
            return Err(GossipError::Config("fanout must be greater than 0".to_string()));
        }
        if self.dedup_capacity == 0 {
            return Err(GossipError::Config(
                "dedup_capacity must be greater than 0".to_string(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(GossipError::Config(
                "failure_threshold must be greater than 0".to_string(),
            ));
        }
        if self.max_send_attempts == 0 {
            return Err(GossipError::Config(
                "max_send_attempts must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(GossipError::Config(
                "request_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(GossipError::Config(
                "event_buffer must be greater than 0".to_string(),
            ));
        }
        if let Some(bad) = self.bootstrap_peers.iter().find(|p| sanitize(p).is_none()) {
            return Err(GossipError::Config(format!(
                "bootstrap peer '{bad}' is not a valid onion address"
            )));
        }
        Ok(())
    }

    /// Sets the fanout factor.
    #[must_use]
    pub const fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }

    /// Sets the dedup capacity.
    #[must_use]
    pub const fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    /// Sets the failure threshold for eviction.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_send_attempts = max_attempts;
        self.retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Sets the per-attempt request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the bootstrap peers.
    #[must_use]
    pub fn with_bootstrap_peers(mut self, peers: Vec<String>) -> Self {
        self.bootstrap_peers = peers;
        self
    }

    /// Returns the pause between send attempts.
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Returns the per-attempt request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
