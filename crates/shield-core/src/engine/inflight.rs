//! In-flight forward tracking
//!
//! Every forwarded query is registered here until its task finishes, so the
//! engine can report how many are outstanding and abort them all on stop.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;

/// One outstanding forward
#[derive(Debug)]
pub struct InFlight {
    /// Client source port inside the tunnel
    pub client_port: u16,
    /// DNS transaction id
    pub txid: u16,
    /// Queried domain
    pub domain: String,
    /// When the query was forwarded
    pub started: Instant,
    abort: Option<AbortHandle>,
}

/// Tracker of outstanding forward tasks
#[derive(Debug, Default)]
pub struct InFlightTracker {
    next_id: AtomicU64,
    entries: DashMap<u64, InFlight>,
}

impl InFlightTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a forward before its task is spawned
    pub fn begin(&self, client_port: u16, txid: u16, domain: impl Into<String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            id,
            InFlight {
                client_port,
                txid,
                domain: domain.into(),
                started: Instant::now(),
                abort: None,
            },
        );
        id
    }

    /// Attach the task handle; a no-op if the task already finished
    pub fn attach(&self, id: u64, handle: AbortHandle) {
        if let Some(mut entry) = self.entries.get_mut(&id) {
            entry.abort = Some(handle);
        }
    }

    /// Remove a finished forward
    pub fn finish(&self, id: u64) -> Option<InFlight> {
        self.entries.remove(&id).map(|(_, entry)| entry)
    }

    /// Abort and forget every outstanding forward
    pub fn abort_all(&self) -> usize {
        let ids: Vec<u64> = self.entries.iter().map(|e| *e.key()).collect();
        let mut aborted = 0;
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(&id) {
                if let Some(handle) = entry.abort {
                    handle.abort();
                }
                aborted += 1;
            }
        }
        aborted
    }

    /// Abort and forget forwards older than `ttl`
    pub fn purge_stale(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            let fresh = now.duration_since(entry.started) < ttl;
            if !fresh {
                if let Some(handle) = &entry.abort {
                    handle.abort();
                }
            }
            fresh
        });
        before.saturating_sub(self.entries.len())
    }

    /// Number of outstanding forwards
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is outstanding
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
