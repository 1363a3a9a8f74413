//! Logging initialization

use anyhow::{Context, Result};
use shield_core::config::LoggingConfig;
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::args::{Args, LogFormat};

/// Effective logging settings after merging flags over the config file
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogSettings {
    level: Level,
    format: LogFormat,
    file: Option<PathBuf>,
}

impl LogSettings {
    fn resolve(args: &Args, config: &LoggingConfig) -> Self {
        let level = if args.quiet {
            Level::ERROR
        } else {
            match args.verbose {
                0 => config.level.parse().unwrap_or(Level::INFO),
                1 => Level::DEBUG,
                _ => Level::TRACE,
            }
        };

        let format = args.log_format.unwrap_or(if config.json_format {
            LogFormat::Json
        } else {
            LogFormat::Text
        });

        Self {
            level,
            format,
            file: args.log_file.clone().or_else(|| config.file.as_ref().map(PathBuf::from)),
        }
    }
}

/// Initialize logging based on CLI arguments and the `[logging]` section
///
/// The returned guard flushes the log file when dropped.
pub fn init(args: &Args) -> Result<Option<WorkerGuard>> {
    // A broken config file is reported by the command that loads it
    let file_config = crate::commands::config::discover(args.config.as_deref())
        .map(|(config, _)| config.logging)
        .unwrap_or_default();
    let settings = LogSettings::resolve(args, &file_config);

    let env_filter = EnvFilter::builder()
        .with_default_directive(settings.level.into())
        .from_env_lossy();

    let console = match settings.format {
        LogFormat::Text => fmt::layer()
            .with_target(args.verbose >= 2)
            .with_thread_ids(args.verbose >= 3)
            .with_file(args.verbose >= 3)
            .with_line_number(args.verbose >= 3)
            .boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    let (file_layer, guard) = match settings.file {
        Some(ref path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = match settings.format {
                LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
                LogFormat::Text | LogFormat::Compact => {
                    fmt::layer().with_ansi(false).with_writer(writer).boxed()
                }
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_flags_override_config() {
        let config = LoggingConfig {
            level: "warn".to_string(),
            file: Some("/var/log/shield.log".to_string()),
            json_format: true,
        };

        let args = Args::parse_from(["shield"]);
        let settings = LogSettings::resolve(&args, &config);
        assert_eq!(settings.level, Level::WARN);
        assert_eq!(settings.format, LogFormat::Json);
        assert_eq!(settings.file, Some(PathBuf::from("/var/log/shield.log")));

        let args = Args::parse_from(["shield", "-vv", "--log-format", "compact", "--log-file", "x.log"]);
        let settings = LogSettings::resolve(&args, &config);
        assert_eq!(settings.level, Level::TRACE);
        assert_eq!(settings.format, LogFormat::Compact);
        assert_eq!(settings.file, Some(PathBuf::from("x.log")));
    }

    #[test]
    fn test_quiet_and_bad_level() {
        let config = LoggingConfig {
            level: "chatty".to_string(),
            ..LoggingConfig::default()
        };

        let settings = LogSettings::resolve(&Args::parse_from(["shield"]), &config);
        assert_eq!(settings.level, Level::INFO);
        assert_eq!(settings.format, LogFormat::Text);

        let settings = LogSettings::resolve(&Args::parse_from(["shield", "-q"]), &config);
        assert_eq!(settings.level, Level::ERROR);
    }
}
