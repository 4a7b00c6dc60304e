//! Configuration validation utilities.
//!
//! Hard errors are reported by each section's `validate`; the checks here
//! only produce warnings about settings that work but are probably unintended.

use super::RelaydConfig;

/// Configuration validator trait.
pub trait ConfigValidator {
    /// Validate the configuration.
    ///
    /// Returns `Ok(())` if valid, or a list of error messages if invalid.
    fn validate(&self) -> Result<(), Vec<String>>;
}

/// Collect warnings about the worker pool and listener combination.
///
/// Warnings are logged, never returned as errors.
pub fn validate_resource_limits(config: &RelaydConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    let workers = config.global.workers.count;
    let cores = num_cpus::get();
    if workers > cores {
        warnings.push(format!(
            "workers.count ({}) exceeds the number of CPU cores ({}). \
             Workers will compete for cores.",
            workers, cores
        ));
    }

    if config.global.workers.pin_to_cpu && workers > cores {
        warnings.push("workers beyond the core count cannot be pinned to a CPU".to_string());
    }

    for listener in &config.listeners {
        if listener.transparent || listener.freebind {
            warnings.push(format!(
                "listener '{}' sets transparent/freebind; this requires CAP_NET_ADMIN",
                listener.name
            ));
        }
        if !listener.bind_to_port && listener.is_quic() {
            warnings.push(format!(
                "listener '{}' does not bind to its port and will not receive datagrams",
                listener.name
            ));
        }
    }

    for warning in &warnings {
        tracing::warn!("{}", warning);
    }
    warnings
}
