//! Engine event sink
//!
//! Callbacks are invoked from the reader thread and forwarding tasks; they
//! must return quickly.

use crate::classifier::{Category, ThreatLevel};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info};

/// Receiver of engine events (history store, UI, notifications)
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    /// A query was blocked
    fn on_blocked(&self, domain: &str, category: &Category, threat: ThreatLevel, at: DateTime<Utc>);

    /// The session is running
    fn on_started(&self);

    /// The session ended
    fn on_stopped(&self);

    /// The session failed
    fn on_error(&self, reason: &str);

    /// A DNS query was evaluated
    fn on_query(&self, _domain: &str, _blocked: bool) {}
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn on_blocked(&self, _: &str, _: &Category, _: ThreatLevel, _: DateTime<Utc>) {}
    fn on_started(&self) {}
    fn on_stopped(&self) {}
    fn on_error(&self, _: &str) {}
}

/// Logs events through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_blocked(&self, domain: &str, category: &Category, threat: ThreatLevel, at: DateTime<Utc>) {
        info!(
            domain,
            category = %category,
            threat = %threat,
            at = %at.to_rfc3339(),
            "Blocked DNS query"
        );
    }

    fn on_started(&self) {
        info!("Filtering started");
    }

    fn on_stopped(&self) {
        info!("Filtering stopped");
    }

    fn on_error(&self, reason: &str) {
        error!(reason, "Filtering failed");
    }
}

/// Forwards every event to several sinks in order
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    /// Create an empty fanout
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of sinks
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Check if there are no sinks
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl EventSink for FanoutSink {
    fn on_blocked(&self, domain: &str, category: &Category, threat: ThreatLevel, at: DateTime<Utc>) {
        for sink in &self.sinks {
            sink.on_blocked(domain, category, threat, at);
        }
    }

    fn on_started(&self) {
        self.sinks.iter().for_each(|s| s.on_started());
    }

    fn on_stopped(&self) {
        self.sinks.iter().for_each(|s| s.on_stopped());
    }

    fn on_error(&self, reason: &str) {
        self.sinks.iter().for_each(|s| s.on_error(reason));
    }

    fn on_query(&self, domain: &str, blocked: bool) {
        self.sinks.iter().for_each(|s| s.on_query(domain, blocked));
    }
}
