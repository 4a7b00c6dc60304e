//! Configuration loading and parsing.
//!
//! Sources, lowest priority first: defaults, the TOML file, `RELAYD_`
//! environment variables, command-line arguments.

use anyhow::{Context, Result};
use clap::{CommandFactory, FromArgMatches, Parser};
use config::Config as ConfigLoader;
use std::path::Path;

use super::RelaydConfig;

/// Command-line interface for the daemon.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(long, short = 'c', default_value = "relayd.toml")]
    pub config: String,

    /// Log level (overrides config file)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Number of worker threads (overrides config file)
    #[arg(long, short = 'w')]
    pub workers: Option<usize>,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate: bool,

    /// Print default configuration and exit
    #[arg(long)]
    pub print_default_config: bool,
}

/// Parse the command line and load the daemon configuration.
///
/// Exits the process for `--print-default-config` and `--validate`.
///
/// # Errors
///
/// Returns an error if the configuration file cannot be parsed or the
/// resulting configuration is invalid.
pub fn load_config() -> Result<RelaydConfig> {
    let matches = CliArgs::command().get_matches();
    let cli =
        CliArgs::from_arg_matches(&matches).context("Failed to parse command-line arguments")?;

    if cli.print_default_config {
        print_default_config()?;
        std::process::exit(0);
    }

    let config = resolve_config(&cli)?;

    if cli.validate {
        println!("✓ Configuration is valid");
        std::process::exit(0);
    }

    Ok(config)
}

/// Merge file, environment and `cli` into a validated configuration.
pub fn resolve_config(cli: &CliArgs) -> Result<RelaydConfig> {
    let mut config = load_config_file(&cli.config)?;

    apply_env_overrides(&mut config)?;

    apply_cli_overrides(&mut config, cli);

    config.validate().map_err(|errors| {
        anyhow::anyhow!("Configuration validation failed:\n{}", errors.join("\n"))
    })?;

    Ok(config)
}

/// Load configuration from a TOML file.
fn load_config_file(path: &str) -> Result<RelaydConfig> {
    let path_obj = Path::new(path);

    // If file doesn't exist, use default config
    if !path_obj.exists() {
        tracing::warn!(
            config_path = %path,
            "Configuration file not found, using defaults"
        );
        return Ok(RelaydConfig::default());
    }

    let config_str = std::fs::read_to_string(path_obj)
        .with_context(|| format!("Failed to read config file: {}", path))?;

    toml::from_str(&config_str).with_context(|| format!("Failed to parse TOML config: {}", path))
}

/// Apply environment variable overrides.
///
/// Environment variables are prefixed with `RELAYD_` and use `__` as a
/// separator.
///
/// Examples:
/// - `RELAYD_GLOBAL__LOGGING__LEVEL=debug`
/// - `RELAYD_GLOBAL__WORKERS__COUNT=4`
/// - `RELAYD_GLOBAL__STATS__REPORT_INTERVAL_SECS=10`
fn apply_env_overrides(config: &mut RelaydConfig) -> Result<()> {
    let env_config = ConfigLoader::builder()
        .add_source(config::Environment::with_prefix("RELAYD").separator("__"))
        .build()
        .context("Failed to load environment variables")?;

    if let Ok(level) = env_config.get_string("global.logging.level") {
        if let Ok(parsed_level) = level.parse() {
            config.global.logging.level = parsed_level;
        }
    }
    if let Ok(json) = env_config.get_bool("global.logging.json_format") {
        config.global.logging.json_format = json;
    }
    if let Ok(count) = env_config.get_int("global.workers.count") {
        if let Ok(count) = usize::try_from(count) {
            config.global.workers.count = count;
        }
    }
    if let Ok(interval) = env_config.get_int("global.stats.report_interval_secs") {
        if let Ok(interval) = u64::try_from(interval) {
            config.global.stats.report_interval_secs = interval;
        }
    }

    Ok(())
}

/// Apply command-line argument overrides.
fn apply_cli_overrides(config: &mut RelaydConfig, cli: &CliArgs) {
    if let Some(ref level_str) = cli.log_level {
        if let Ok(level) = level_str.parse() {
            config.global.logging.level = level;
        } else {
            tracing::warn!(level = %level_str, "Invalid log level specified, ignoring");
        }
    }

    if let Some(workers) = cli.workers {
        config.global.workers.count = workers;
    }
}

/// Print the default configuration in TOML format.
fn print_default_config() -> Result<()> {
    let default_config = RelaydConfig::default();
    let toml_str =
        toml::to_string_pretty(&default_config).context("Failed to serialize default config")?;
    println!("{}", toml_str);
    Ok(())
}
