//! Reader thread
//!
//! Reads packets in order, answers blocked queries inline and hands allowed
//! ones to forwarding tasks on the runtime.

use super::{BlockMode, DnsResolver, Shared, Verdict, VirtualInterface};
use super::stats::Counters;
use crate::classifier::Category;
use crate::error::{Error, Result};
use crate::packet::{self, dns, DnsQuery, PacketBuilder, PacketView};
use bytes::Bytes;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, info, instrument, trace, warn};

/// How often stale in-flight forwards are purged
const PURGE_INTERVAL: Duration = Duration::from_secs(1);

/// Bytes of an unparseable packet included in logs
const HEX_PREFIX_LEN: usize = 16;

pub(super) struct Worker<R> {
    shared: Arc<Shared<R>>,
    interface: Arc<dyn VirtualInterface>,
    running: Arc<AtomicBool>,
    runtime: Handle,
}

impl<R: DnsResolver> Worker<R> {
    pub(super) fn new(
        shared: Arc<Shared<R>>,
        interface: Arc<dyn VirtualInterface>,
        running: Arc<AtomicBool>,
        runtime: Handle,
    ) -> Self {
        Self {
            shared,
            interface,
            running,
            runtime,
        }
    }

    pub(super) fn run(self) {
        let mut buf = vec![0u8; self.shared.settings.read_buffer_size.max(1)];
        match self.read_loop(&mut buf) {
            Ok(()) => debug!("Reader exited"),
            Err(e) if self.is_running() => {
                self.running.store(false, Ordering::Release);
                self.shared.fail_session(&e, self.interface.as_ref());
            }
            Err(e) => debug!(error = %e, "Reader exited during stop"),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn read_loop(&self, buf: &mut [u8]) -> Result<()> {
        let mut last_purge = Instant::now();

        while self.is_running() {
            // Forward tasks may have exhausted the write budget
            self.shared.check_write_budget()?;

            if last_purge.elapsed() >= PURGE_INTERVAL {
                self.purge_stale();
                last_purge = Instant::now();
            }

            let len = match self.interface.recv(buf) {
                Ok(0) => {
                    thread::sleep(self.shared.settings.idle_backoff);
                    continue;
                }
                Ok(len) => len,
                Err(_) if !self.is_running() => return Ok(()),
                Err(Error::Interface(reason)) => return Err(Error::Interface(reason)),
                Err(e) => return Err(Error::Interface(format!("read failed: {e}"))),
            };

            Counters::incr(&self.shared.stats.packets_read);
            self.handle_packet(&buf[..len])?;
        }

        Ok(())
    }

    fn purge_stale(&self) {
        let purged = self.shared.inflight.purge_stale(self.shared.settings.stale_after());
        if purged > 0 {
            Counters::add(&self.shared.stats.forward_failures, purged as u64);
            debug!(purged, "Abandoned stale forwards");
        }
    }

    /// Handle one packet; per-packet parse failures are counted and dropped
    fn handle_packet(&self, data: &[u8]) -> Result<()> {
        match self.dispatch(data) {
            Err(e) if !e.is_session_fatal() => {
                Counters::incr(&self.shared.stats.malformed);
                debug!(
                    error = %e,
                    len = data.len(),
                    head = %hex::encode(&data[..data.len().min(HEX_PREFIX_LEN)]),
                    "Dropping malformed packet"
                );
                Ok(())
            }
            other => other,
        }
    }

    fn dispatch(&self, data: &[u8]) -> Result<()> {
        let view = packet::parse(data)?;

        if !view.is_dns_query() {
            Counters::incr(&self.shared.stats.passthrough);
            trace!(
                protocol = ?view.protocol,
                dst_port = view.dest_port,
                fragment = view.is_fragment(),
                "Passthrough"
            );
            return self.shared.write(self.interface.as_ref(), data).map(drop);
        }

        Counters::incr(&self.shared.stats.dns_queries);
        let query = DnsQuery::parse(view.payload()).map_err(|e| {
            Error::packet_parse_at(e.to_string(), view.payload_offset)
        })?;
        self.handle_query(&view, &query)
    }

    #[instrument(level = "debug", skip(self, view, query), fields(src_port = view.source_port))]
    fn handle_query(&self, view: &PacketView<'_>, query: &DnsQuery) -> Result<()> {
        let verdict = self.shared.evaluate(&query.queried_name);
        self.shared
            .events
            .on_query(&verdict.domain, verdict.result.is_blocked);

        if verdict.result.is_blocked {
            self.block(view, query, &verdict)
        } else {
            self.forward(view, query, verdict.domain);
            Ok(())
        }
    }

    fn block(&self, view: &PacketView<'_>, query: &DnsQuery, verdict: &Verdict) -> Result<()> {
        let stats = &self.shared.stats;
        Counters::incr(&stats.blocked);
        if verdict.by_schedule {
            Counters::incr(&stats.blocked_by_schedule);
        }

        let result = &verdict.result;
        let category = result.category.clone().unwrap_or_else(Category::custom);
        debug!(
            domain = %verdict.domain,
            category = %category,
            threat = %result.threat_level,
            rule = ?result.matched_rule,
            source = %result.source,
            "Blocking query"
        );

        let settings = &self.shared.settings;
        let answer = match settings.block_mode {
            BlockMode::Nxdomain => Some(dns::nxdomain_response(view.payload(), query)),
            BlockMode::Sinkhole => Some(dns::sinkhole_response(
                view.payload(),
                query,
                settings.sinkhole_ipv4,
            )),
            BlockMode::Drop => None,
        };

        let written = match (answer, PacketBuilder::reply_to(view)) {
            (Some(answer), Some(reply)) => match reply.payload(&answer).build() {
                Ok(packet) => self.shared.write(self.interface.as_ref(), &packet).map(drop),
                Err(e) => {
                    warn!(error = %e, "Failed to build block answer");
                    Ok(())
                }
            },
            _ => Ok(()),
        };

        self.shared
            .events
            .on_blocked(&verdict.domain, &category, result.threat_level, Utc::now());
        written
    }

    fn forward(&self, view: &PacketView<'_>, query: &DnsQuery, domain: String) {
        let Some(reply) = PacketBuilder::reply_to(view) else {
            return;
        };

        let txid = query.transaction_id;
        let payload = Bytes::copy_from_slice(view.payload());
        let id = self.shared.inflight.begin(view.source_port, txid, domain);

        let shared = Arc::clone(&self.shared);
        let interface = Arc::clone(&self.interface);
        let task = self.runtime.spawn(async move {
            let outcome =
                tokio::time::timeout(shared.settings.forward_timeout, shared.resolver.resolve(payload)).await;
            let Some(entry) = shared.inflight.finish(id) else {
                return;
            };

            let answer = match outcome {
                Ok(Ok(answer)) if dns::transaction_id(&answer) == Some(txid) => answer,
                Ok(Ok(_)) => {
                    Counters::incr(&shared.stats.forward_failures);
                    debug!(domain = %entry.domain, "Upstream answer has a foreign transaction id");
                    return;
                }
                Ok(Err(e)) => {
                    Counters::incr(&shared.stats.forward_failures);
                    debug!(domain = %entry.domain, error = %e, "Forward failed");
                    return;
                }
                Err(_) => {
                    Counters::incr(&shared.stats.forward_failures);
                    debug!(domain = %entry.domain, "Forward timed out");
                    return;
                }
            };

            match reply.payload(&answer).build() {
                Ok(packet) => match shared.write(interface.as_ref(), &packet) {
                    Ok(true) => {
                        Counters::incr(&shared.stats.forwarded);
                        trace!(
                            domain = %entry.domain,
                            elapsed = ?entry.started.elapsed(),
                            "Forwarded answer"
                        );
                    }
                    Ok(false) => {}
                    Err(e) => info!(error = %e, "Write budget exhausted by forward"),
                },
                Err(e) => {
                    Counters::incr(&shared.stats.forward_failures);
                    warn!(error = %e, "Failed to wrap upstream answer");
                }
            }
        });
        self.shared.inflight.attach(id, task.abort_handle());
    }
}
