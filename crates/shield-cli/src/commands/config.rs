//! Config command - configuration management

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use shield_core::config::{Config, Preset};
use std::path::{Path, PathBuf};
use tracing::info;

/// File names searched in the working directory
const LOCAL_CANDIDATES: [&str; 2] = ["shield.toml", "config.toml"];

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Show a preset instead of the config file
        #[arg(short, long)]
        preset: Option<String>,
    },

    /// Generate a configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "shield.toml")]
        output: PathBuf,

        /// Age-group preset to start from
        #[arg(short, long, default_value = "child")]
        preset: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Config file to validate (default: detect)
        file: Option<PathBuf>,
    },

    /// Show config file locations
    Paths,
}

/// Execute config command
pub fn execute(args: ConfigArgs, config: Option<&Path>) -> Result<()> {
    match args.action {
        ConfigAction::Show { preset } => show_config(config, preset),
        ConfigAction::Generate {
            output,
            preset,
            force,
        } => generate_config(&output, &preset, force),
        ConfigAction::Validate { file } => validate_config(file.as_deref().or(config)),
        ConfigAction::Paths => show_paths(),
    }
}

/// Load the explicit config file, or the first one found, or defaults
///
/// Returns the path the configuration came from.
pub fn discover(explicit: Option<&Path>) -> Result<(Config, Option<PathBuf>)> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(),
    };

    match path {
        Some(path) => {
            let config = Config::load(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            Ok((config, Some(path)))
        }
        None => Ok((Config::default(), None)),
    }
}

/// Per-user directories
pub fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "shield")
}

fn find_config_file() -> Option<PathBuf> {
    LOCAL_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .chain(project_dirs().map(|dirs| dirs.config_dir().join("config.toml")))
        .find(|path| path.exists())
}

fn show_config(config: Option<&Path>, preset: Option<String>) -> Result<()> {
    let config = match preset {
        Some(name) => Preset::from_name(&name)
            .with_context(|| format!("Unknown preset: {name}"))?
            .into_config(),
        None => discover(config)?.0,
    };

    let toml_str = config.to_toml().context("Failed to serialize config")?;
    println!("{toml_str}");
    Ok(())
}

fn generate_config(output: &Path, preset_name: &str, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }

    let preset = Preset::from_name(preset_name)
        .with_context(|| format!("Unknown preset: {preset_name}"))?;
    let toml_str = preset.into_config().to_toml().context("Failed to serialize config")?;

    let content = format!(
        "# Shield configuration\n\
         # Generated from preset: {preset} ({})\n\n\
         {toml_str}",
        preset.description()
    );

    std::fs::write(output, content)
        .with_context(|| format!("Failed to write config to {}", output.display()))?;

    info!(path = %output.display(), preset = %preset, "Generated config file");
    println!("{} Configuration file generated: {}", "✓".green(), output.display());
    Ok(())
}

fn validate_config(file: Option<&Path>) -> Result<()> {
    let (config, path) = discover(file)?;
    let Some(path) = path else {
        anyhow::bail!("No configuration file found (see 'shield config paths')");
    };

    config.validate().context("Configuration validation failed")?;

    println!("{} Configuration is valid: {}", "✓".green(), path.display());
    println!("  Interface: {} ({}/{}, mtu {})",
        config.tunnel.interface_name,
        config.tunnel.address,
        config.tunnel.prefix_len,
        config.tunnel.mtu
    );
    println!("  Block mode: {}", config.tunnel.block_mode);
    println!(
        "  Upstream: {}",
        config
            .upstream
            .servers
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "  Profile: {}",
        config.profile.as_ref().map_or("none", |p| p.name.as_str())
    );
    Ok(())
}

fn show_paths() -> Result<()> {
    println!("Configuration file search paths:");
    println!();
    for (i, name) in LOCAL_CANDIDATES.iter().enumerate() {
        println!("  {}. ./{name}", i + 1);
    }

    if let Some(dirs) = project_dirs() {
        println!("  {}. {}", LOCAL_CANDIDATES.len() + 1, dirs.config_dir().join("config.toml").display());
        println!();
        println!("Default list files:");
        println!();
        println!("  {}", dirs.data_dir().join("blocklist.txt").display());
        println!("  {}", dirs.data_dir().join("allowlist.txt").display());
    }

    Ok(())
}
