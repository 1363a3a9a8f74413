//! Command-line argument parsing

use crate::commands::Command;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Shield - parental-control DNS filter
///
/// Captures DNS traffic through a local TUN interface, answers queries for
/// blocked domains itself and forwards the rest to a filtering resolver.
#[derive(Parser, Debug)]
#[command(name = "shield")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Subcommand to execute (default: run)
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE", global = true, env = "SHIELD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format for logs
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormat>,

    /// Log file path
    #[arg(long, value_name = "FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Run in quiet mode (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text
    Text,
    /// JSON format
    Json,
    /// Compact format
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;

    #[test]
    fn test_verbose() {
        let args = Args::parse_from(["shield", "-v"]);
        assert_eq!(args.verbose, 1);

        let args = Args::parse_from(["shield", "-vvv"]);
        assert_eq!(args.verbose, 3);
    }

    #[test]
    fn test_default_command_is_none() {
        let args = Args::parse_from(["shield"]);
        assert!(args.command.is_none());
        assert!(args.log_format.is_none());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from([
            "shield",
            "run",
            "--dry-run",
            "-c",
            "/etc/shield.toml",
            "--log-format",
            "json",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("/etc/shield.toml")));
        assert_eq!(args.log_format, Some(LogFormat::Json));
        assert!(matches!(args.command, Some(Command::Run(ref run)) if run.dry_run));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Args::try_parse_from(["shield", "-q", "-v"]).is_err());
    }
}
