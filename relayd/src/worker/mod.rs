//! Worker thread orchestration.
//!
//! Each worker is a native OS thread that owns one socket per listener, the
//! QUIC dispatcher of every datagram listener and the connections accepted by
//! every stream listener. Nothing a worker owns is touched by another thread;
//! the only shared state is the stats store, the accepted-socket counter and
//! the shutdown flag.
//!
//! ```text
//! loop {
//!     for each datagram listener: recv_from -> dispatcher, idle sweep
//!     for each stream listener:   accept -> ConnectionSocket, reap closed
//!     nothing to do: sleep poll_interval
//! }
//! ```

mod datagram;
mod stream;

#[cfg(test)]
mod tests;

pub use datagram::DatagramListener;
pub use stream::StreamListener;

use crate::config::{ListenerConfig, RelaydConfig, WorkerConfig};
use crate::listener::ListenSocketFactory;
use anyhow::{Context, Result};
use relayd_net::{AcceptedSocketCounter, Address, ListenSocketState, Socket, SocketInterface, SocketType};
use relayd_quic::{
    ConnectionCounter, ConnectionHandler, ConnectionIdReplacer, DispatcherConfig, EventLoopHandle,
    ListenerContext, QuicDispatcher, QuicStatNames, WorkerDispatcher,
};
use relayd_stats::{ListenerStats, PerWorkerListenerStats, Store};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// One worker's listeners and event loop.
pub struct Worker {
    id: usize,
    config: WorkerConfig,
    datagram: Vec<DatagramListener>,
    stream: Vec<StreamListener>,
    connection_handler: Arc<ConnectionCounter>,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn connection_handler(&self) -> &Arc<ConnectionCounter> {
        &self.connection_handler
    }

    pub fn datagram_listeners(&self) -> &[DatagramListener] {
        &self.datagram
    }

    pub fn stream_listeners(&self) -> &[StreamListener] {
        &self.stream
    }

    /// Serve every listener once. Returns the number of datagrams read plus
    /// connections accepted or released.
    pub fn poll_once(&mut self, buf: &mut [u8]) -> usize {
        let now = Instant::now();
        let mut work = 0;
        for listener in &mut self.datagram {
            work += listener.poll(buf, now);
        }
        for listener in &mut self.stream {
            work += listener.poll(buf);
        }
        work
    }

    /// Run the event loop until the shutdown flag is set (runs in the
    /// worker's own thread).
    pub fn run(mut self) -> Result<()> {
        if self.config.pin_to_cpu {
            if let Some(core_id) =
                core_affinity::get_core_ids().and_then(|ids| ids.get(self.id).copied())
            {
                if core_affinity::set_for_current(core_id) {
                    info!(worker_id = self.id, core_id = core_id.id, "Worker thread pinned to CPU core");
                } else {
                    warn!(worker_id = self.id, "Failed to pin thread to CPU core");
                }
            }
        }

        info!(
            worker_id = self.id,
            datagram_listeners = self.datagram.len(),
            stream_listeners = self.stream.len(),
            "Worker event loop starting"
        );

        let mut buf = vec![0u8; self.config.recv_buffer_size];
        let idle_sleep = Duration::from_millis(self.config.poll_interval_ms);

        while !self.shutdown.load(Ordering::Relaxed) {
            if self.poll_once(&mut buf) == 0 {
                thread::sleep(idle_sleep);
            }
        }

        self.stop();
        Ok(())
    }

    /// Close every session and release every held connection.
    pub fn stop(&mut self) {
        let mut sessions = 0;
        for listener in &mut self.datagram {
            sessions += listener.shutdown();
        }
        let mut connections = 0;
        for listener in &mut self.stream {
            connections += listener.shutdown();
        }
        info!(
            worker_id = self.id,
            sessions,
            connections,
            remaining = self.connection_handler.num_connections(),
            "Worker shutting down"
        );
    }
}

/// Listener state created once and shared by every worker.
struct SharedListener {
    config: ListenerConfig,
    factory: ListenSocketFactory,
    context: Arc<ListenerContext>,
}

/// Everything a worker needs that outlives it and is shared between workers.
#[derive(Clone)]
pub struct WorkerResources {
    pub store: Store,
    pub accepted: AcceptedSocketCounter,
    pub iface: Arc<dyn SocketInterface>,
    pub stat_names: Arc<QuicStatNames>,
    pub replacer: ConnectionIdReplacer,
}

impl WorkerResources {
    pub fn new(store: Store, accepted: AcceptedSocketCounter, iface: Arc<dyn SocketInterface>) -> Self {
        Self {
            store,
            accepted,
            iface,
            stat_names: Arc::new(QuicStatNames::new()),
            // Same keys in every worker, so a connection ID maps to the same
            // replacement wherever it lands.
            replacer: ConnectionIdReplacer::new(),
        }
    }
}

/// Workers built but not yet started, plus the resolved listener addresses.
pub struct WorkerSet {
    workers: Vec<Worker>,
    listener_addresses: Vec<(String, Arc<Address>)>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerSet {
    /// Create every listener's socket factory and one [`Worker`] per
    /// configured worker, each holding its own socket for every listener.
    pub fn build(config: &RelaydConfig, resources: &WorkerResources) -> Result<Self> {
        let worker_config = &config.global.workers;
        if worker_config.count == 0 {
            anyhow::bail!("workers.count must be at least 1");
        }

        let mut listeners = Vec::with_capacity(config.listeners.len());
        for listener in &config.listeners {
            let factory = ListenSocketFactory::from_config(Arc::clone(&resources.iface), listener)
                .with_context(|| format!("failed to create listener '{}'", listener.name))?;
            let scope = resources.store.root_scope().create_scope(&listener.stat_prefix());
            info!(
                listener = %listener.name,
                addr = %factory.local_address(),
                socket_type = ?listener.socket_type,
                reuse_port = factory.reuse_port(),
                "Listener created"
            );
            listeners.push(SharedListener {
                config: listener.clone(),
                context: Arc::new(ListenerContext::new(listener.name.clone(), scope)),
                factory,
            });
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(worker_config.count);
        for worker_id in 0..worker_config.count {
            workers.push(build_worker(
                worker_id,
                worker_config,
                &listeners,
                resources,
                Arc::clone(&shutdown),
            )?);
        }

        let listener_addresses = listeners
            .iter()
            .map(|l| (l.config.name.clone(), Arc::clone(l.factory.local_address())))
            .collect();

        Ok(Self {
            workers,
            listener_addresses,
            shutdown,
        })
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn workers_mut(&mut self) -> &mut [Worker] {
        &mut self.workers
    }

    /// Resolved address of every listener, in configuration order.
    pub fn listener_addresses(&self) -> &[(String, Arc<Address>)] {
        &self.listener_addresses
    }

    /// Move every worker into its own native thread.
    pub fn spawn(self) -> Result<NetworkHandle> {
        let worker_count = self.workers.len();
        let mut threads = Vec::with_capacity(worker_count);

        for worker in self.workers {
            let worker_id = worker.id;
            let handle = thread::Builder::new()
                .name(format!("relayd-worker-{}", worker_id))
                .spawn(move || worker.run())
                .with_context(|| format!("failed to spawn worker {}", worker_id))?;
            threads.push(handle);
        }

        info!(workers = worker_count, "Workers started");

        Ok(NetworkHandle {
            workers: threads,
            shutdown: self.shutdown,
            worker_count,
            listener_addresses: self.listener_addresses,
        })
    }
}

fn build_worker(
    worker_id: usize,
    worker_config: &WorkerConfig,
    listeners: &[SharedListener],
    resources: &WorkerResources,
    shutdown: Arc<AtomicBool>,
) -> Result<Worker> {
    let connection_handler = Arc::new(ConnectionCounter::new());
    let mut datagram = Vec::new();
    let mut stream = Vec::new();

    for listener in listeners {
        let name = &listener.config.name;
        let socket = listener
            .factory
            .get_listen_socket()
            .with_context(|| format!("worker {}: no listen socket for '{}'", worker_id, name))?;
        let scope = listener.context.listener_scope();
        let listener_stats = ListenerStats::new(scope);
        let per_worker_stats = PerWorkerListenerStats::new(scope, worker_id);

        match listener.config.socket_type {
            SocketType::Datagram => {
                let socket = Arc::new(socket);
                let self_address = socket.local_address();
                let hooks = WorkerDispatcher::new(
                    Arc::clone(&connection_handler) as Arc<dyn ConnectionHandler>,
                    Arc::clone(&listener.context),
                    listener_stats,
                    per_worker_stats,
                    EventLoopHandle::new(worker_id),
                    Arc::clone(&socket),
                    Arc::clone(&resources.stat_names),
                    resources.replacer,
                );
                let dispatcher_config = DispatcherConfig {
                    expected_server_connection_id_length: listener
                        .config
                        .quic
                        .expected_connection_id_length,
                    idle_timeout: listener.config.quic.idle_timeout(),
                    ..DispatcherConfig::default()
                };
                datagram.push(DatagramListener::new(
                    name.clone(),
                    socket,
                    QuicDispatcher::new(hooks, dispatcher_config, self_address),
                    Duration::from_millis(worker_config.idle_sweep_interval_ms),
                ));
            }
            SocketType::Stream => {
                if socket.state() == ListenSocketState::Bound {
                    socket.listen(listener.config.backlog).with_context(|| {
                        format!("worker {}: listen() failed for '{}'", worker_id, name)
                    })?;
                } else {
                    debug!(worker_id, listener = %name, "Listener not bound; not accepting");
                }
                stream.push(StreamListener::new(
                    name.clone(),
                    worker_id,
                    socket,
                    resources.accepted.clone(),
                    Arc::clone(&connection_handler) as Arc<dyn ConnectionHandler>,
                    listener_stats,
                    per_worker_stats,
                ));
            }
        }
    }

    debug!(worker_id, datagram = datagram.len(), stream = stream.len(), "Worker created");

    Ok(Worker {
        id: worker_id,
        config: worker_config.clone(),
        datagram,
        stream,
        connection_handler,
        shutdown,
    })
}

/// Handle for managing worker threads.
///
/// Dropping this handle signals the workers to stop without waiting for them.
pub struct NetworkHandle {
    workers: Vec<JoinHandle<Result<()>>>,
    shutdown: Arc<AtomicBool>,
    worker_count: usize,
    listener_addresses: Vec<(String, Arc<Address>)>,
}

impl NetworkHandle {
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn listener_addresses(&self) -> &[(String, Arc<Address>)] {
        &self.listener_addresses
    }

    /// Signal all workers to stop and wait for them to exit.
    pub fn shutdown(mut self) {
        info!("Shutting down workers");
        self.shutdown.store(true, Ordering::Relaxed);

        for (i, worker) in self.workers.drain(..).enumerate() {
            match worker.join() {
                Ok(Ok(())) => {
                    debug!(worker_id = i, "Worker thread exited cleanly");
                }
                Ok(Err(e)) => {
                    error!(worker_id = i, error = ?e, "Worker thread returned error");
                }
                Err(e) => {
                    error!(worker_id = i, error = ?e, "Worker thread panicked");
                }
            }
        }

        info!("Worker shutdown complete");
    }
}

impl Drop for NetworkHandle {
    fn drop(&mut self) {
        debug!("NetworkHandle dropped, signaling shutdown");
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// Build and start the workers for `config`.
pub fn spawn(config: &RelaydConfig, resources: &WorkerResources) -> Result<NetworkHandle> {
    info!(
        workers = config.global.workers.count,
        listeners = config.listeners.len(),
        pin_to_cpu = config.global.workers.pin_to_cpu,
        "Initializing workers"
    );
    WorkerSet::build(config, resources)?.spawn()
}
