//! Run command - main filtering session

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use shield_core::config::{Config, Preset};
use shield_core::engine::{FanoutSink, TracingSink};
use shield_core::{EventSink, ListType, PolicyStore, Stats};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::config::discover;
use crate::events::JsonLinesSink;

/// Run command arguments
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Age-group preset applied as the active profile (young-child, child, teen)
    #[arg(short, long)]
    pub preset: Option<String>,

    /// Validate configuration and policy without starting the tunnel
    #[arg(long)]
    pub dry_run: bool,

    /// Append engine events to this file as JSON lines
    #[arg(long, value_name = "FILE")]
    pub events: Option<PathBuf>,

    /// Seconds between statistics log lines
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub stats_interval: u64,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            preset: None,
            dry_run: false,
            events: None,
            stats_interval: 60,
        }
    }
}

/// Execute the run command
pub fn execute(args: RunArgs, config_path: Option<&Path>) -> Result<()> {
    info!("Starting Shield...");

    let config = load_config(&args, config_path)?;
    config.validate().context("Configuration validation failed")?;
    info!(name = %config.general.name, preset = ?config.preset, "Loaded configuration");

    let policy = Arc::new(PolicyStore::new());
    config.apply_policy(&policy).context("Failed to load policy")?;

    let sink = build_sink(args.events.as_deref())?;

    if args.dry_run {
        warn!("Dry run mode - the tunnel will not be started");
        print_summary(&config, &policy);
        return Ok(());
    }

    session::run(&config, policy, sink, &args)?;

    info!("Shield stopped");
    Ok(())
}

fn load_config(args: &RunArgs, config_path: Option<&Path>) -> Result<Config> {
    let (mut config, path) = discover(config_path)?;
    if let Some(path) = path {
        info!(path = %path.display(), "Using config file");
    }

    if let Some(ref name) = args.preset {
        let preset = Preset::from_name(name).with_context(|| format!("Unknown preset: {name}"))?;
        config.preset = Some(preset);
        config.profile = Some(preset.profile());
    }

    Ok(config)
}

fn build_sink(events: Option<&Path>) -> Result<Arc<dyn EventSink>> {
    let mut sink = FanoutSink::new().with(Arc::new(TracingSink));
    if let Some(path) = events {
        sink = sink.with(Arc::new(JsonLinesSink::open(path)?));
        info!(path = %path.display(), "Writing events");
    }
    Ok(Arc::new(sink))
}

fn print_summary(config: &Config, policy: &PolicyStore) {
    println!("{} Configuration and policy are valid", "✓".green());
    println!("  Blocklist entries: {}", policy.entries(ListType::Block).len());
    println!("  Allowlist entries: {}", policy.entries(ListType::Allow).len());
    match policy.active_profile() {
        Some(profile) => println!("  Active profile: {} ({:?})", profile.name, profile.restriction_level),
        None => println!("  Active profile: none"),
    }
    println!("  Block mode: {}", config.tunnel.block_mode);
}

fn log_stats(stats: &Stats, message: &str) {
    info!(
        packets = stats.packets_read,
        queries = stats.dns_queries,
        blocked = stats.blocked,
        by_schedule = stats.blocked_by_schedule,
        forwarded = stats.forwarded,
        forward_failures = stats.forward_failures,
        passthrough = stats.passthrough,
        malformed = stats.malformed,
        in_flight = stats.in_flight,
        "{message}"
    );
}

#[cfg(target_os = "linux")]
mod session {
    use super::{log_stats, RunArgs};
    use anyhow::{Context, Result};
    use shield_core::classifier::LocalReputation;
    use shield_core::config::Config;
    use shield_core::{EngineState, EventSink, PolicyStore, TunnelEngine};
    use shield_platform::linux::{LinuxTunEstablisher, DEFAULT_FWMARK};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tracing::{info, warn};

    const TICK: Duration = Duration::from_millis(250);

    pub(super) fn run(
        config: &Config,
        policy: Arc<PolicyStore>,
        sink: Arc<dyn EventSink>,
        args: &RunArgs,
    ) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("shield-forward")
            .enable_all()
            .build()
            .context("Failed to start async runtime")?;

        let mut settings = config.engine_settings();
        if settings.interface.exclude_self {
            settings.upstream.fwmark.get_or_insert(DEFAULT_FWMARK);
        }
        let establisher =
            LinuxTunEstablisher::new().with_fwmark(settings.upstream.fwmark.unwrap_or(DEFAULT_FWMARK));

        let mut builder = TunnelEngine::builder(settings, Arc::new(establisher), Arc::clone(&policy))
            .events(sink)
            .runtime(runtime.handle().clone());
        if config.policy.local_reputation {
            builder = builder.reputation(Arc::new(LocalReputation::default()));
        }
        let engine = builder.build();

        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();
        ctrlc::set_handler(move || {
            info!("Received interrupt signal, shutting down...");
            r.store(false, Ordering::SeqCst);
        })
        .context("Failed to set signal handler")?;

        engine.start().context("Failed to start filtering")?;
        info!(
            interface = %config.tunnel.interface_name,
            "Filtering DNS - press Ctrl+C to stop"
        );

        let outcome = supervise(&engine, &policy, config, &running, args);

        engine.stop().context("Failed to stop filtering")?;
        log_stats(&engine.stats(), "Session ended");
        outcome
    }

    fn supervise(
        engine: &TunnelEngine,
        policy: &PolicyStore,
        config: &Config,
        running: &AtomicBool,
        args: &RunArgs,
    ) -> Result<()> {
        let reload_every = Duration::from_secs(config.policy.reload_interval_secs);
        let stats_every = Duration::from_secs(args.stats_interval.max(1));
        let mut last_reload = Instant::now();
        let mut last_stats = Instant::now();

        while running.load(Ordering::SeqCst) {
            std::thread::sleep(TICK);

            if engine.state() != EngineState::Running {
                let reason = engine.last_error().unwrap_or_else(|| "unknown error".to_string());
                anyhow::bail!("Filtering stopped unexpectedly: {reason}");
            }

            if !reload_every.is_zero() && last_reload.elapsed() >= reload_every {
                match policy.reload_if_changed() {
                    Ok(0) => {}
                    Ok(count) => info!(files = count, "Reloaded list files"),
                    Err(e) => warn!(error = %e, "Failed to reload list files"),
                }
                last_reload = Instant::now();
            }

            if last_stats.elapsed() >= stats_every {
                log_stats(&engine.stats(), "Filter statistics");
                last_stats = Instant::now();
            }
        }

        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
mod session {
    use super::RunArgs;
    use anyhow::Result;
    use shield_core::config::Config;
    use shield_core::{EventSink, PolicyStore};
    use std::sync::Arc;
    use tracing::warn;

    pub(super) fn run(
        _config: &Config,
        _policy: Arc<PolicyStore>,
        _sink: Arc<dyn EventSink>,
        _args: &RunArgs,
    ) -> Result<()> {
        warn!("The TUN interface is only supported on Linux");
        println!("Configuration and policy were validated; filtering itself only runs on Linux.");
        Ok(())
    }
}
