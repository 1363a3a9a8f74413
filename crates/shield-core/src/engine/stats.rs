//! Session counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Packets read from the interface
    pub packets_read: u64,
    /// Packets written back unchanged
    pub passthrough: u64,
    /// DNS queries seen
    pub dns_queries: u64,
    /// Queries blocked for any reason
    pub blocked: u64,
    /// Queries blocked outside allowed hours
    pub blocked_by_schedule: u64,
    /// Answers relayed from upstream
    pub forwarded: u64,
    /// Forwards that failed or timed out
    pub forward_failures: u64,
    /// Packets or queries that failed to parse
    pub malformed: u64,
    /// Interface writes that failed
    pub write_failures: u64,
    /// Forwards currently outstanding
    pub in_flight: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) packets_read: AtomicU64,
    pub(crate) passthrough: AtomicU64,
    pub(crate) dns_queries: AtomicU64,
    pub(crate) blocked: AtomicU64,
    pub(crate) blocked_by_schedule: AtomicU64,
    pub(crate) forwarded: AtomicU64,
    pub(crate) forward_failures: AtomicU64,
    pub(crate) malformed: AtomicU64,
    pub(crate) write_failures: AtomicU64,
}

impl Counters {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, in_flight: usize) -> Stats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        Stats {
            packets_read: load(&self.packets_read),
            passthrough: load(&self.passthrough),
            dns_queries: load(&self.dns_queries),
            blocked: load(&self.blocked),
            blocked_by_schedule: load(&self.blocked_by_schedule),
            forwarded: load(&self.forwarded),
            forward_failures: load(&self.forward_failures),
            malformed: load(&self.malformed),
            write_failures: load(&self.write_failures),
            in_flight: in_flight as u64,
        }
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.packets_read,
            &self.passthrough,
            &self.dns_queries,
            &self.blocked,
            &self.blocked_by_schedule,
            &self.forwarded,
            &self.forward_failures,
            &self.malformed,
            &self.write_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
