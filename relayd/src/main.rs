use anyhow::Context;
use relayd::{config, runtime, telemetry, worker};
use relayd_net::{AcceptedSocketCounter, SystemSocketInterface};
use relayd_stats::Store;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

fn main() -> anyhow::Result<()> {
    let config = config::load_config()?;

    telemetry::init_logging(&config.global.logging)
        .with_context(|| "failed to initialize logging")?;

    info!(
        listeners = config.listeners.len(),
        workers = config.global.workers.count,
        "Configuration loaded successfully"
    );

    // Tokio only hosts signal handling and the stats reporter.
    let tokio_runtime = runtime::create_runtime(&config.global.runtime)
        .with_context(|| "failed to create tokio runtime")?;
    let runtime_handle = tokio_runtime.handle().clone();

    let store = Store::new();
    let accepted = AcceptedSocketCounter::new();

    let reporter = telemetry::start_stats_reporter(
        &config.global.stats,
        store.clone(),
        accepted.clone(),
        &runtime_handle,
    );

    let resources = worker::WorkerResources::new(store, accepted, Arc::new(SystemSocketInterface));
    let network_handle =
        worker::spawn(&config, &resources).with_context(|| "failed to start workers")?;

    for (name, address) in network_handle.listener_addresses() {
        info!(listener = %name, addr = %address, "Listening");
    }

    let shutdown_notify = Arc::new(Notify::new());
    let shutdown_notify_clone = Arc::clone(&shutdown_notify);

    tokio_runtime.spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            return;
        }
        info!("Shutdown signal received");
        shutdown_notify_clone.notify_one();
    });

    tokio_runtime.block_on(async {
        shutdown_notify.notified().await;
    });

    info!("Initiating graceful shutdown");

    // Blocks until every worker has closed its sessions and connections.
    network_handle.shutdown();

    tokio_runtime.block_on(async {
        reporter.shutdown().await;
    });

    info!("Shutting down tokio runtime");
    tokio_runtime.shutdown_timeout(std::time::Duration::from_secs(5));

    info!("Shutdown complete");
    Ok(())
}
