//! Block and allow list management commands
//!
//! Edits the plain-text list files the `run` command loads and checks how a
//! domain would be classified under the configured policy.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use shield_core::classifier::{classify_with_signals, normalize, LocalReputation, ReputationSource};
use shield_core::config::Config;
use shield_core::schedule::{describe_window, is_allowed_now, Clock, SystemClock, TimeOfDay};
use shield_core::{ClassificationResult, ListType, PolicyStore};
use std::path::{Path, PathBuf};

use super::config::{discover, project_dirs};

/// Filter management arguments
#[derive(Args, Debug)]
pub struct FilterArgs {
    #[command(subcommand)]
    pub command: FilterCommands,
}

/// Options naming the list file to edit
#[derive(Args, Debug, Clone)]
pub struct ListSelector {
    /// Which list: block or allow
    #[arg(short, long, default_value = "block")]
    pub list: ListType,

    /// List file path (default: from config, then the data directory)
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

/// Filter subcommands
#[derive(Subcommand, Debug)]
pub enum FilterCommands {
    /// List all entries of a list
    List {
        #[command(flatten)]
        target: ListSelector,
    },

    /// Add a domain (use *.example.com for a wildcard)
    Add {
        /// Domain pattern to add
        domain: String,

        #[command(flatten)]
        target: ListSelector,
    },

    /// Remove a domain
    Remove {
        /// Domain pattern to remove
        domain: String,

        #[command(flatten)]
        target: ListSelector,
    },

    /// Create a list file with example entries
    Init {
        #[command(flatten)]
        target: ListSelector,
    },

    /// Show how a domain is classified under the configured policy
    Check {
        /// Domain to check
        domain: String,

        /// Time of day to evaluate the schedule at (HH:MM, default: now)
        #[arg(long)]
        at: Option<TimeOfDay>,
    },
}

/// Execute filter command
pub fn execute(args: FilterArgs, config: Option<&Path>) -> Result<()> {
    let (config, _) = discover(config)?;
    match args.command {
        FilterCommands::List { target } => list_domains(target.list, &resolve_path(&target, &config)),
        FilterCommands::Add { domain, target } => {
            add_domain(&domain, target.list, &resolve_path(&target, &config))
        }
        FilterCommands::Remove { domain, target } => {
            remove_domain(&domain, target.list, &resolve_path(&target, &config))
        }
        FilterCommands::Init { target } => init_list(target.list, &resolve_path(&target, &config)),
        FilterCommands::Check { domain, at } => check_domain(&domain, &config, at),
    }
}

fn list_file_name(list: ListType) -> &'static str {
    match list {
        ListType::Block => "blocklist.txt",
        ListType::Allow => "allowlist.txt",
    }
}

fn resolve_path(target: &ListSelector, config: &Config) -> PathBuf {
    if let Some(file) = &target.file {
        return file.clone();
    }
    let configured = match target.list {
        ListType::Block => &config.policy.blocklist_file,
        ListType::Allow => &config.policy.allowlist_file,
    };
    configured.clone().unwrap_or_else(|| {
        project_dirs().map_or_else(
            || PathBuf::from(list_file_name(target.list)),
            |dirs| dirs.data_dir().join(list_file_name(target.list)),
        )
    })
}

fn load_list(path: &Path, list: ListType) -> Result<PolicyStore> {
    let store = PolicyStore::new();
    if path.exists() {
        store
            .load_list_file(path, list)
            .with_context(|| format!("Failed to load list file {}", path.display()))?;
    }
    Ok(store)
}

fn list_domains(list: ListType, path: &Path) -> Result<()> {
    if !path.exists() {
        println!("{}", "List file not found. Create one with 'filter init'".yellow());
        println!("Expected path: {}", path.display());
        return Ok(());
    }

    let entries = load_list(path, list)?.entries(list);

    println!("{}", "═".repeat(50).bright_blue());
    println!("{}", format!(" Domain {list}").bright_white().bold());
    println!("{}", "═".repeat(50).bright_blue());
    println!("File: {}", path.display().to_string().cyan());
    println!("Total entries: {}", entries.len().to_string().green());
    println!("{}", "─".repeat(50).bright_black());

    if entries.is_empty() {
        println!("{}", "  (empty)".dimmed());
    }
    for entry in &entries {
        if entry.wildcard {
            println!("  {} {}", "◉".yellow(), entry.domain);
        } else {
            println!("  {} {}", "●".green(), entry.domain);
        }
    }

    println!("{}", "═".repeat(50).bright_blue());
    Ok(())
}

fn add_domain(domain: &str, list: ListType, path: &Path) -> Result<()> {
    let store = load_list(path, list)?;
    let added = store
        .add_entry(domain, list)
        .with_context(|| format!("Invalid domain pattern: {domain}"))?;

    if !added {
        println!("{} {} is already in the {list}", "!".yellow(), domain.cyan());
        return Ok(());
    }

    store
        .save_list_file(path, list)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("{} Added {} to the {list}", "✓".green(), domain.cyan());
    println!("  File: {}", path.display());
    Ok(())
}

fn remove_domain(domain: &str, list: ListType, path: &Path) -> Result<()> {
    if !path.exists() {
        println!("{} List file not found: {}", "✗".red(), path.display());
        return Ok(());
    }

    let store = load_list(path, list)?;
    if !store.remove_entry(domain, list) {
        println!("{} {} is not in the {list}", "!".yellow(), domain.cyan());
        return Ok(());
    }

    store
        .save_list_file(path, list)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("{} Removed {} from the {list}", "✓".green(), domain.cyan());
    Ok(())
}

fn example_entries(list: ListType) -> &'static [&'static str] {
    match list {
        ListType::Block => &[
            "*.bet365.com",
            "*.pokerstars.com",
            "*.omegle.com",
            "*.chatroulette.com",
        ],
        ListType::Allow => &[
            "*.khanacademy.org",
            "*.wikipedia.org",
            "*.scratch.mit.edu",
            "*.duolingo.com",
        ],
    }
}

fn init_list(list: ListType, path: &Path) -> Result<()> {
    if path.exists() {
        println!("{} List file already exists: {}", "!".yellow(), path.display());
        println!("Use 'filter add' to add domains or delete the file first.");
        return Ok(());
    }

    let store = PolicyStore::new();
    store.add_entries(example_entries(list).iter().copied(), list)?;
    store
        .save_list_file(path, list)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("{} Created {list} file", "✓".green());
    println!("  File: {}", path.display().to_string().cyan());
    println!();
    println!("Edit the file to customize your domain list.");
    println!("Use 'shield filter list --list {}' to view entries.", match list {
        ListType::Block => "block",
        ListType::Allow => "allow",
    });
    Ok(())
}

/// Classification plus the schedule decision for one domain
#[derive(Debug)]
struct Verdict {
    result: ClassificationResult,
    schedule: Option<(String, bool)>,
}

impl Verdict {
    fn is_blocked(&self) -> bool {
        self.result.is_blocked || matches!(self.schedule, Some((_, false)))
    }
}

fn evaluate(domain: &str, config: &Config, now: TimeOfDay) -> Result<Verdict> {
    let store = PolicyStore::new();
    config.apply_policy(&store).context("Failed to load policy")?;

    let domain = normalize(domain);
    let signals = if config.policy.local_reputation {
        vec![LocalReputation::default().check(&domain)]
    } else {
        Vec::new()
    };

    let snapshot = store.snapshot();
    let result = classify_with_signals(&domain, &snapshot, &signals);
    let schedule = snapshot
        .active_profile()
        .filter(|p| p.schedule_enabled)
        .map(|p| (describe_window(p), is_allowed_now(p, now)));
    Ok(Verdict { result, schedule })
}

fn check_domain(domain: &str, config: &Config, at: Option<TimeOfDay>) -> Result<()> {
    let now = at.unwrap_or_else(|| SystemClock.now());
    let verdict = evaluate(domain, config, now)?;
    let result = &verdict.result;

    println!("{}", "─".repeat(50).bright_black());
    println!("Domain: {}", domain.cyan());
    println!(
        "Classification: {}",
        if result.is_blocked { "Blocked".red() } else { "Allowed".green() }
    );
    println!("Source: {}", result.source);
    if let Some(category) = &result.category {
        println!("Category: {category}");
    }
    println!("Threat level: {}", result.threat_level);
    if let Some(rule) = &result.matched_rule {
        println!("Matched rule: {}", rule.yellow());
    }
    match &verdict.schedule {
        Some((window, true)) => println!("Schedule: {window} (inside at {now})"),
        Some((window, false)) => println!("Schedule: {window} ({} at {now})", "outside".red()),
        None => println!("Schedule: {}", "none".dimmed()),
    }
    println!(
        "Result: {}",
        if verdict.is_blocked() {
            "Blocked (answered locally)".red()
        } else {
            "Forwarded upstream".green()
        }
    );
    println!("{}", "─".repeat(50).bright_black());
    Ok(())
}
