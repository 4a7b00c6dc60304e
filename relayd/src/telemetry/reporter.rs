//! Periodic stats report.

use crate::config::StatsConfig;
use relayd_net::AcceptedSocketCounter;
use relayd_stats::{StatsSnapshot, Store};
use std::time::Duration;
use tokio::task::JoinHandle;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the reporter task.
pub struct StatsReporterHandle {
    task_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl StatsReporterHandle {
    /// Handle for a disabled reporter.
    pub fn disabled() -> Self {
        Self {
            task_handle: None,
            shutdown_tx: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the reporter after one final report, waiting at most five seconds.
    pub async fn shutdown(self) {
        if let Some(tx) = self.shutdown_tx {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(result) => {
                    if let Err(e) = result {
                        tracing::error!(error = ?e, "Stats reporter panicked during shutdown");
                    }
                }
                Err(_) => {
                    tracing::error!("Stats reporter shutdown timed out after 5 seconds");
                }
            }
        }
    }
}

/// Spawn the reporter on `runtime_handle`.
///
/// Returns a disabled handle when reporting is turned off.
pub fn start_stats_reporter(
    config: &StatsConfig,
    store: Store,
    accepted: AcceptedSocketCounter,
    runtime_handle: &tokio::runtime::Handle,
) -> StatsReporterHandle {
    if !config.enabled {
        tracing::warn!("Stats reporting is disabled");
        return StatsReporterHandle::disabled();
    }

    let period = Duration::from_secs(config.report_interval_secs);
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();

    let task_handle = runtime_handle.spawn(async move {
        tracing::info!(interval_secs = period.as_secs(), "Stats reporter started");

        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    break;
                }
                _ = interval.tick() => {
                    log_snapshot(&store.snapshot(), accepted.count());
                }
            }
        }

        log_snapshot(&store.snapshot(), accepted.count());
        tracing::info!("Stats reporter stopped");
    });

    StatsReporterHandle {
        task_handle: Some(task_handle),
        shutdown_tx: Some(shutdown_tx),
    }
}

fn log_snapshot(snapshot: &StatsSnapshot, accepted_sockets: u64) {
    tracing::info!(
        counters = snapshot.counters.len(),
        gauges = snapshot.gauges.len(),
        accepted_sockets,
        "stats report"
    );
    for (name, value) in snapshot.counters.iter().filter(|(_, v)| **v > 0) {
        tracing::info!(stat = %name, value, "counter");
    }
    for (name, value) in snapshot.gauges.iter().filter(|(_, v)| **v != 0) {
        tracing::info!(stat = %name, value, "gauge");
    }
}
