//! Tunnel engine
//!
//! Owns one filtering session at a time: establishes the virtual interface,
//! runs the reader thread that classifies DNS queries, and forwards allowed
//! queries upstream on the Tokio runtime.
//!
//! ```text
//!  Stopped -> Starting -> Running -> Stopping -> Stopped
//!                 |          |
//!                 +-> Error <+-> Stopped
//! ```

mod device;
mod events;
mod forward;
mod inflight;
mod state;
mod stats;
mod worker;

pub use device::{host_routes, parse_route, InterfaceConfig, InterfaceEstablisher, VirtualInterface};
pub use events::{EventSink, FanoutSink, NoopSink, TracingSink};
pub use forward::{DnsResolver, UdpResolver, UpstreamSettings};
pub use inflight::{InFlight, InFlightTracker};
pub use state::{EngineState, StateMachine};
pub use stats::Stats;

use crate::classifier::{classify_with_signals, normalize, ClassificationResult, ReputationSource};
use crate::error::{Error, Result};
use crate::policy::PolicyStore;
use crate::schedule::{describe_window, is_allowed_now, Clock, SystemClock};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stats::Counters;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

/// Answer written for a blocked query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockMode {
    /// NXDOMAIN echoing the question
    #[default]
    Nxdomain,
    /// A record pointing at the sinkhole address
    Sinkhole,
    /// No answer at all
    Drop,
}

impl fmt::Display for BlockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockMode::Nxdomain => write!(f, "nxdomain"),
            BlockMode::Sinkhole => write!(f, "sinkhole"),
            BlockMode::Drop => write!(f, "drop"),
        }
    }
}

impl FromStr for BlockMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "nxdomain" => Ok(BlockMode::Nxdomain),
            "sinkhole" => Ok(BlockMode::Sinkhole),
            "drop" => Ok(BlockMode::Drop),
            other => Err(Error::config_value(
                "tunnel.block_mode",
                format!("unknown block mode '{other}'"),
            )),
        }
    }
}

/// Slack between a forward's deadline and its purge from the tracker
pub const IN_FLIGHT_MARGIN: Duration = Duration::from_millis(500);

/// Everything the engine needs for a session
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Interface requested from the establisher
    pub interface: InterfaceConfig,
    /// Answer for blocked queries
    pub block_mode: BlockMode,
    /// Address used by [`BlockMode::Sinkhole`]
    pub sinkhole_ipv4: Ipv4Addr,
    /// Size of the packet read buffer
    pub read_buffer_size: usize,
    /// Sleep when the interface has no data
    pub idle_backoff: Duration,
    /// Consecutive write failures that end the session
    pub max_consecutive_write_failures: u32,
    /// Age after which an in-flight forward is abandoned
    pub in_flight_ttl: Duration,
    /// Budget for one forward, all upstream attempts included
    pub forward_timeout: Duration,
    /// Upstream resolvers
    pub upstream: UpstreamSettings,
}

impl EngineSettings {
    /// Age at which a forward is considered abandoned
    ///
    /// Never shorter than the forward deadline, so a slow secondary attempt
    /// still gets its answer written.
    pub fn stale_after(&self) -> Duration {
        self.in_flight_ttl.max(self.forward_timeout + IN_FLIGHT_MARGIN)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        let upstream = UpstreamSettings::default();
        Self {
            interface: InterfaceConfig::default(),
            block_mode: BlockMode::default(),
            sinkhole_ipv4: Ipv4Addr::UNSPECIFIED,
            read_buffer_size: 32_767,
            idle_backoff: Duration::from_millis(10),
            max_consecutive_write_failures: 16,
            in_flight_ttl: Duration::from_secs(5),
            forward_timeout: upstream.default_forward_timeout(),
            upstream,
        }
    }
}

/// Verdict for one query, schedule included
#[derive(Debug, Clone)]
pub(crate) struct Verdict {
    pub(crate) domain: String,
    pub(crate) result: ClassificationResult,
    pub(crate) by_schedule: bool,
}

/// State shared by the engine handle, the reader thread and forward tasks
pub(crate) struct Shared<R> {
    pub(crate) settings: EngineSettings,
    establisher: Arc<dyn InterfaceEstablisher>,
    policy: Arc<PolicyStore>,
    pub(crate) resolver: Arc<R>,
    pub(crate) events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    reputation: Vec<Arc<dyn ReputationSource>>,
    state: StateMachine,
    pub(crate) stats: Counters,
    pub(crate) inflight: InFlightTracker,
    write_failures: AtomicU32,
    last_error: Mutex<Option<String>>,
}

impl<R> Shared<R> {
    /// Classify a queried name and apply the active profile's schedule
    pub(crate) fn evaluate(&self, name: &str) -> Verdict {
        let domain = normalize(name);
        let snapshot = self.policy.snapshot();
        let signals: Vec<_> = self.reputation.iter().map(|s| s.check(&domain)).collect();
        let result = classify_with_signals(&domain, &snapshot, &signals);
        if result.is_blocked {
            return Verdict {
                domain,
                result,
                by_schedule: false,
            };
        }

        match snapshot.active_profile() {
            Some(profile) if !is_allowed_now(profile, self.clock.now()) => Verdict {
                domain,
                result: ClassificationResult::out_of_schedule(&describe_window(profile)),
                by_schedule: true,
            },
            _ => Verdict {
                domain,
                result,
                by_schedule: false,
            },
        }
    }

    /// Write one packet, tracking consecutive failures
    ///
    /// Returns whether the packet was written; fails only once the failure
    /// budget is exhausted.
    pub(crate) fn write(&self, interface: &dyn VirtualInterface, packet: &[u8]) -> Result<bool> {
        match interface.send(packet) {
            Ok(()) => {
                self.write_failures.store(0, Ordering::Relaxed);
                Ok(true)
            }
            Err(e) => {
                Counters::incr(&self.stats.write_failures);
                let count = self.write_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(error = %e, count, "Interface write failed");
                self.check_write_budget().map(|()| false)
            }
        }
    }

    pub(crate) fn check_write_budget(&self) -> Result<()> {
        let count = self.write_failures.load(Ordering::Relaxed);
        if count >= self.settings.max_consecutive_write_failures {
            return Err(Error::WriteFailures { count });
        }
        Ok(())
    }

    fn record_error(&self, err: &Error) -> String {
        let reason = err.to_string();
        *self.last_error.lock() = Some(reason.clone());
        reason
    }

    /// Tear down a session that failed on its own
    ///
    /// Does nothing when a stop request already owns the teardown.
    pub(crate) fn fail_session(&self, err: &Error, interface: &dyn VirtualInterface) {
        if self.state.transition(EngineState::Error).is_err() {
            return;
        }
        let reason = self.record_error(err);
        error!(error = %reason, "Filtering session failed");
        self.events.on_error(&reason);

        if let Err(e) = interface.close() {
            warn!(error = %e, "Failed to close interface");
        }
        let aborted = self.inflight.abort_all();
        if self.state.transition(EngineState::Stopped).is_ok() {
            info!(aborted, "Engine stopped after failure");
            self.events.on_stopped();
        }
    }

    fn fail_start(&self, err: &Error) {
        let reason = self.record_error(err);
        error!(error = %reason, "Failed to start filtering");
        let was_running = matches!(self.state.transition(EngineState::Error), Ok(EngineState::Running));
        self.events.on_error(&reason);
        if self.state.transition(EngineState::Stopped).is_ok() && was_running {
            self.events.on_stopped();
        }
    }
}

struct Session {
    running: Arc<AtomicBool>,
    interface: Arc<dyn VirtualInterface>,
    reader: JoinHandle<()>,
}

/// The filtering engine
///
/// Cheap to query from any thread. `start` and `stop` are serialized.
pub struct TunnelEngine<R: DnsResolver = UdpResolver> {
    shared: Arc<Shared<R>>,
    runtime: Option<Handle>,
    session: Mutex<Option<Session>>,
}

impl TunnelEngine<UdpResolver> {
    /// Start building an engine that forwards with [`UdpResolver`]
    pub fn builder(
        settings: EngineSettings,
        establisher: Arc<dyn InterfaceEstablisher>,
        policy: Arc<PolicyStore>,
    ) -> EngineBuilder<UdpResolver> {
        let resolver = UdpResolver::new(settings.upstream.clone());
        EngineBuilder {
            settings,
            establisher,
            policy,
            resolver,
            events: Arc::new(NoopSink),
            clock: Arc::new(SystemClock),
            reputation: Vec::new(),
            runtime: None,
        }
    }
}

impl<R: DnsResolver> TunnelEngine<R> {
    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        self.shared.state.get()
    }

    /// Counter snapshot for the current or last session
    pub fn stats(&self) -> Stats {
        self.shared.stats.snapshot(self.shared.inflight.len())
    }

    /// Reason the last session failed, cleared on start
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    /// Engine settings
    pub fn settings(&self) -> &EngineSettings {
        &self.shared.settings
    }

    /// Establish the interface and start filtering
    ///
    /// Only valid from [`EngineState::Stopped`]. Establishment failures are
    /// reported through the event sink and returned; they are never retried.
    pub fn start(&self) -> Result<()> {
        let mut session = self.session.lock();
        if self.state() == EngineState::Stopped {
            reap(&mut session);
        }

        self.shared.state.transition(EngineState::Starting)?;
        self.shared.stats.reset();
        self.shared.write_failures.store(0, Ordering::Relaxed);
        *self.shared.last_error.lock() = None;

        match self.open_session() {
            Ok(opened) => {
                *session = Some(opened);
                Ok(())
            }
            Err(e) => {
                self.shared.fail_start(&e);
                Err(e)
            }
        }
    }

    fn open_session(&self) -> Result<Session> {
        let runtime = match &self.runtime {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?,
        };

        let config = &self.shared.settings.interface;
        info!(
            interface = %config.name,
            address = %config.address,
            mtu = config.mtu,
            "Establishing interface"
        );
        let interface = self.shared.establisher.establish(config)?;

        self.shared.state.transition(EngineState::Running)?;
        self.shared.events.on_started();

        let running = Arc::new(AtomicBool::new(true));
        let worker = worker::Worker::new(
            Arc::clone(&self.shared),
            Arc::clone(&interface),
            Arc::clone(&running),
            runtime,
        );
        let reader = thread::Builder::new()
            .name("shield-reader".to_string())
            .spawn(move || worker.run());

        match reader {
            Ok(reader) => {
                info!(interface = interface.name(), "Filtering started");
                Ok(Session {
                    running,
                    interface,
                    reader,
                })
            }
            Err(e) => {
                if let Err(close_err) = interface.close() {
                    warn!(error = %close_err, "Failed to close interface");
                }
                Err(Error::Runtime(format!("failed to spawn reader thread: {e}")))
            }
        }
    }

    /// Stop filtering
    ///
    /// Idempotent: when not running this only reaps a reader that ended on
    /// its own and emits no events.
    pub fn stop(&self) -> Result<()> {
        let mut session = self.session.lock();
        if self.shared.state.transition(EngineState::Stopping).is_err() {
            reap(&mut session);
            return Ok(());
        }

        if let Some(Session {
            running,
            interface,
            reader,
        }) = session.take()
        {
            running.store(false, Ordering::Release);
            if let Err(e) = interface.close() {
                warn!(error = %e, "Failed to close interface");
            }
            if reader.join().is_err() {
                error!("Reader thread panicked");
            }
        }

        let aborted = self.shared.inflight.abort_all();
        self.shared.state.transition(EngineState::Stopped)?;
        self.shared.events.on_stopped();
        info!(aborted, "Filtering stopped");
        Ok(())
    }
}

impl<R: DnsResolver> Drop for TunnelEngine<R> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "Failed to stop engine on drop");
        }
    }
}

impl<R: DnsResolver> fmt::Debug for TunnelEngine<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelEngine")
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn reap(session: &mut Option<Session>) {
    if let Some(ended) = session.take() {
        ended.running.store(false, Ordering::Release);
        if ended.reader.join().is_err() {
            error!("Reader thread panicked");
        }
    }
}

/// Builder for [`TunnelEngine`]
pub struct EngineBuilder<R> {
    settings: EngineSettings,
    establisher: Arc<dyn InterfaceEstablisher>,
    policy: Arc<PolicyStore>,
    resolver: R,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    reputation: Vec<Arc<dyn ReputationSource>>,
    runtime: Option<Handle>,
}

impl<R: DnsResolver> EngineBuilder<R> {
    /// Forward with a different resolver
    pub fn resolver<R2: DnsResolver>(self, resolver: R2) -> EngineBuilder<R2> {
        EngineBuilder {
            settings: self.settings,
            establisher: self.establisher,
            policy: self.policy,
            resolver,
            events: self.events,
            clock: self.clock,
            reputation: self.reputation,
            runtime: self.runtime,
        }
    }

    /// Set the event sink
    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Set the clock used for schedules
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Add a reputation source consulted for every query
    #[must_use]
    pub fn reputation(mut self, source: Arc<dyn ReputationSource>) -> Self {
        self.reputation.push(source);
        self
    }

    /// Spawn forwards on this runtime instead of the caller's
    #[must_use]
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Build the engine, stopped
    pub fn build(self) -> TunnelEngine<R> {
        TunnelEngine {
            shared: Arc::new(Shared {
                settings: self.settings,
                establisher: self.establisher,
                policy: self.policy,
                resolver: Arc::new(self.resolver),
                events: self.events,
                clock: self.clock,
                reputation: self.reputation,
                state: StateMachine::new(),
                stats: Counters::default(),
                inflight: InFlightTracker::new(),
                write_failures: AtomicU32::new(0),
                last_error: Mutex::new(None),
            }),
            runtime: self.runtime,
            session: Mutex::new(None),
        }
    }
}
