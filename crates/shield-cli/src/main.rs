//! Shield CLI
//!
//! Command-line front end for the parental-control DNS filter.

mod args;
mod commands;
mod events;
mod logging;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use args::Args;

fn main() -> Result<()> {
    let args = Args::parse();

    // File logging stops when the guard is dropped
    let _log_guard = logging::init(&args)?;

    if !args.quiet && args.command.as_ref().map_or(true, commands::Command::shows_banner) {
        print_banner();
    }

    let result = run(args);

    if let Err(ref e) = result {
        error!("Fatal error: {:#}", e);
    }

    result
}

fn run(args: Args) -> Result<()> {
    let config = args.config.as_deref();
    match args.command {
        Some(commands::Command::Run(run_args)) => commands::run::execute(run_args, config),
        Some(commands::Command::Config(config_args)) => commands::config::execute(config_args, config),
        Some(commands::Command::Filter(filter_args)) => commands::filter::execute(filter_args, config),
        Some(commands::Command::Schedule(schedule_args)) => commands::schedule::execute(schedule_args),
        Some(commands::Command::Completions(comp_args)) => commands::completions::execute(comp_args),
        None => commands::run::execute(commands::run::RunArgs::default(), config),
    }
}

fn print_banner() {
    use colored::Colorize;

    println!();
    println!("{}", "╔═══════════════════════════════════════════════════════╗".cyan());
    println!(
        "{}{}{}",
        "║  ".cyan(),
        format!("Shield v{:<8}", env!("CARGO_PKG_VERSION")).green().bold(),
        "                                    ║".cyan()
    );
    println!(
        "{}{}{}",
        "║  ".cyan(),
        "Parental-control DNS filter".white(),
        "                          ║".cyan()
    );
    println!("{}", "╚═══════════════════════════════════════════════════════╝".cyan());
    println!();
}
