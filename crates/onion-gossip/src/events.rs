//! Broadcast streams exposed to the embedding application.
//!
//! Every subscriber sees every event. A subscriber that falls more than the configured
//! buffer behind loses the oldest events and receives `RecvError::Lagged`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::envelope::Envelope;

/// Severity of a diagnostic log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Routine protocol chatter.
    Debug,
    /// Lifecycle changes, discoveries, deliveries.
    Info,
    /// Failed sends and dropped input.
    Warn,
    /// Forged or unverifiable traffic.
    Security,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Security => "SECURITY",
        };
        f.write_str(s)
    }
}

/// One diagnostic line emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// When the line was emitted.
    pub at: DateTime<Utc>,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {}", self.at.format("%H:%M:%S"), self.level, self.message)
    }
}

/// Sender half of the delivered-message and log streams.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    messages: broadcast::Sender<Envelope>,
    logs: broadcast::Sender<LogLine>,
}

impl EventBus {
    pub(crate) fn new(buffer: usize) -> Self {
        let (messages, _) = broadcast::channel(buffer.max(1));
        let (logs, _) = broadcast::channel(buffer.max(1));
        Self { messages, logs }
    }

    pub(crate) fn subscribe_messages(&self) -> broadcast::Receiver<Envelope> {
        self.messages.subscribe()
    }

    pub(crate) fn subscribe_logs(&self) -> broadcast::Receiver<LogLine> {
        self.logs.subscribe()
    }

    /// Publishes a verified envelope to message subscribers.
    pub(crate) fn deliver(&self, envelope: Envelope) {
        // No subscribers is not an error.
        let _ = self.messages.send(envelope);
    }

    pub(crate) fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message.into());
    }

    pub(crate) fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message.into());
    }

    pub(crate) fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message.into());
    }

    pub(crate) fn security(&self, message: impl Into<String>) {
        self.log(LogLevel::Security, message.into());
    }

    fn log(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Debug => debug!("{message}"),
            LogLevel::Info => info!("{message}"),
            LogLevel::Warn => warn!("{message}"),
            LogLevel::Security => warn!(target: "onion_gossip::security", "{message}"),
        }
        let _ = self.logs.send(LogLine {
            level,
            message,
            at: Utc::now(),
        });
    }
}
