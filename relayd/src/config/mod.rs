//! Daemon configuration module.
//!
//! # Architecture
//!
//! - **Global Configuration:** runtime, logging, worker pool, stats report
//! - **Listeners:** one table per listening address
//!
//! # Example
//!
//! ```toml
//! [global.workers]
//! count = 4
//!
//! [global.logging]
//! level = "debug"
//!
//! [[listeners]]
//! name = "quic_ingress"
//! address = "0.0.0.0:8443"
//! socket_type = "datagram"
//!
//! [[listeners]]
//! name = "tcp_ingress"
//! address = "0.0.0.0:8080"
//! socket_type = "stream"
//! reuse_port = false
//! ```

pub mod global;
pub mod listener;
pub mod loader;
pub mod validation;


pub use global::{GlobalConfig, LogLevel, LoggingConfig, RuntimeConfig, StatsConfig, WorkerConfig};
pub use listener::{ListenerConfig, QuicListenerConfig};
pub use loader::{load_config, resolve_config, CliArgs};
pub use validation::ConfigValidator;

use relayd_net::SocketType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaydConfig {
    /// Global daemon configuration
    pub global: GlobalConfig,

    /// Listening addresses served by every worker
    pub listeners: Vec<ListenerConfig>,
}

impl Default for RelaydConfig {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            listeners: vec![ListenerConfig::default()],
        }
    }
}

impl RelaydConfig {
    /// Validate the entire configuration, including cross-listener checks.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(e) = self.global.validate() {
            errors.extend(e);
        }

        if self.listeners.is_empty() {
            errors.push("at least one listener must be configured".to_string());
        }

        for listener in &self.listeners {
            if let Err(e) = listener.validate() {
                for err in e {
                    errors.push(format!("Listener '{}': {}", listener.name, err));
                }
            }

            if listener.socket_type == SocketType::Datagram
                && !listener.reuse_port
                && self.global.workers.count > 1
            {
                errors.push(format!(
                    "Listener '{}': Listening on UDP when concurrency is > 1 without the \
                     SO_REUSEPORT socket option results in unstable packet proxying. \
                     Configure the reuse_port listener option or set workers.count = 1.",
                    listener.name
                ));
            }
        }

        let mut names = HashSet::new();
        for listener in &self.listeners {
            if !names.insert(listener.name.as_str()) {
                errors.push(format!("Duplicate listener name '{}'", listener.name));
            }
        }

        // Port 0 asks the kernel for a fresh port, so it never collides.
        let mut addresses = HashSet::new();
        for listener in self.listeners.iter().filter(|l| l.bind_to_port) {
            if listener.address.port() == Some(0) {
                continue;
            }
            if !addresses.insert((&listener.address, listener.socket_type)) {
                errors.push(format!(
                    "Listener '{}': address {} is already used by another listener",
                    listener.name, listener.address
                ));
            }
        }

        if errors.is_empty() {
            validation::validate_resource_limits(self);
            Ok(())
        } else {
            Err(errors)
        }
    }
}
