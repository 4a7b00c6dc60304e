//! Global daemon configuration.
//!
//! Settings that apply to every listener: the tokio runtime used for
//! signals and background tasks, logging, the native worker pool and the
//! periodic stats report.

use serde::{Deserialize, Serialize};

/// Global daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Runtime (async executor) configuration
    pub runtime: RuntimeConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Native worker thread configuration
    pub workers: WorkerConfig,

    /// Periodic stats report configuration
    pub stats: StatsConfig,
}

impl GlobalConfig {
    /// Validate global configuration.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(e) = self.runtime.validate() {
            errors.extend(e);
        }

        if let Err(e) = self.workers.validate() {
            errors.extend(e);
        }

        if let Err(e) = self.stats.validate() {
            errors.extend(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Runtime configuration for the async executor.
///
/// The runtime only hosts the signal handler and the stats reporter;
/// packet processing happens on the native workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads for the Tokio runtime.
    ///
    /// **Default:** 2
    pub worker_threads: usize,

    /// Maximum number of blocking threads in the pool.
    ///
    /// **Default:** 16
    pub max_blocking_threads: usize,

    /// Thread name prefix for runtime threads.
    ///
    /// **Default:** `"relayd-rt"`
    pub thread_name: String,

    /// Stack size for each thread in bytes.
    ///
    /// **Default:** 2 MB
    pub thread_stack_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            max_blocking_threads: 16,
            thread_name: "relayd-rt".to_string(),
            thread_stack_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.worker_threads == 0 {
            errors.push("worker_threads must be > 0".to_string());
        }

        if self.worker_threads > 1024 {
            errors.push("worker_threads is unreasonably high (> 1024)".to_string());
        }

        if self.max_blocking_threads == 0 {
            errors.push("max_blocking_threads must be > 0".to_string());
        }

        if self.thread_stack_size < 128 * 1024 {
            errors.push("thread_stack_size too small (< 128 KB)".to_string());
        }

        if self.thread_stack_size > 64 * 1024 * 1024 {
            errors.push("thread_stack_size too large (> 64 MB)".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Native worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of worker threads. Every listener gets one socket per worker.
    ///
    /// **Default:** number of CPU cores
    pub count: usize,

    /// Pin worker `i` to CPU core `i`.
    ///
    /// **Default:** `true`
    pub pin_to_cpu: bool,

    /// How long a worker sleeps when none of its sockets has work.
    ///
    /// **Default:** 1 ms
    pub poll_interval_ms: u64,

    /// Interval between idle-session sweeps of a QUIC dispatcher.
    ///
    /// **Default:** 1000 ms
    pub idle_sweep_interval_ms: u64,

    /// Size of the per-worker datagram receive buffer.
    ///
    /// **Default:** 65527 (largest UDP payload QUIC allows)
    pub recv_buffer_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: num_cpus::get().max(1),
            pin_to_cpu: true,
            poll_interval_ms: 1,
            idle_sweep_interval_ms: 1000,
            recv_buffer_size: 65527,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.count == 0 {
            errors.push("workers.count must be > 0".to_string());
        }

        if self.count > 1024 {
            errors.push("workers.count is unreasonably high (> 1024)".to_string());
        }

        if self.poll_interval_ms == 0 {
            errors.push("workers.poll_interval_ms must be > 0".to_string());
        }

        if self.idle_sweep_interval_ms == 0 {
            errors.push("workers.idle_sweep_interval_ms must be > 0".to_string());
        }

        // An Initial datagram must fit.
        if self.recv_buffer_size < 1200 {
            errors.push("workers.recv_buffer_size too small (< 1200 bytes)".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Periodic stats report written to the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Enable the periodic report.
    ///
    /// **Default:** `true`
    pub enabled: bool,

    /// Seconds between two reports.
    ///
    /// **Default:** 60
    pub report_interval_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_interval_secs: 60,
        }
    }
}

impl StatsConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        if self.enabled && self.report_interval_secs == 0 {
            return Err(vec!["stats.report_interval_secs must be > 0".to_string()]);
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level for the entire daemon. `RUST_LOG` takes precedence.
    ///
    /// **Default:** `Info`
    pub level: LogLevel,

    /// Enable structured JSON logging.
    ///
    /// **Default:** `false`
    pub json_format: bool,

    /// Enable ANSI color codes in logs.
    ///
    /// Disable when logging to files or non-TTY outputs.
    ///
    /// **Default:** `true`
    pub enable_colors: bool,

    /// Include source file and line number in logs.
    ///
    /// **Default:** `false`
    pub include_file_line: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            enable_colors: true,
            include_file_line: false,
        }
    }
}

/// Log level enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}
