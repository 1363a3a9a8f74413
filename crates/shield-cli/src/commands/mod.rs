//! CLI commands

pub mod completions;
pub mod config;
pub mod filter;
pub mod run;
pub mod schedule;

use clap::Subcommand;

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the DNS filter (main command)
    Run(run::RunArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Block and allow list management
    Filter(filter::FilterArgs),

    /// Allowed-hours checks
    Schedule(schedule::ScheduleArgs),

    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

impl Command {
    /// Whether the banner is printed before running
    pub fn shows_banner(&self) -> bool {
        matches!(self, Command::Run(_))
    }
}
