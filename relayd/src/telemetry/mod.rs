//! # Telemetry
//!
//! Structured logging through `tracing` plus a periodic report of the stats
//! store.
//!
//! Workers update atomic counters and gauges in a shared
//! [`relayd_stats::Store`]; nothing is logged per packet. A task on the tokio
//! runtime snapshots the store at a fixed interval and writes it to the log.

pub mod reporter;

pub use reporter::{start_stats_reporter, StatsReporterHandle};

use crate::config::LoggingConfig;
use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured logging.
///
/// `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_string()))?;

    let (json_layer, text_layer) = if config.json_format {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_file(config.include_file_line)
            .with_line_number(config.include_file_line);
        (Some(layer), None)
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(config.enable_colors)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(config.include_file_line)
            .with_line_number(config.include_file_line);
        (None, Some(layer))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;

    tracing::info!(level = %config.level, json = config.json_format, "Logging initialized");
    Ok(())
}
