//! TCP and unix-domain listener served by one worker.
//!
//! Accepted connections are wrapped as accepted [`ConnectionSocket`]s and
//! held until the peer closes them or the worker stops. Proxying their bytes
//! is not part of this daemon; whatever a peer sends is read and discarded.

use relayd_net::{AcceptedSocketCounter, ConnectionSocket, ListenSocket, Socket};
use relayd_quic::ConnectionHandler;
use relayd_stats::{ListenerStats, PerWorkerListenerStats};
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

const ACCEPT_BATCH: usize = 64;

/// Reads per connection and poll before it is checked again next time.
const DRAIN_READS: usize = 4;

pub struct StreamListener {
    name: String,
    worker_id: usize,
    socket: ListenSocket,
    accepted_counter: AcceptedSocketCounter,
    connection_handler: Arc<dyn ConnectionHandler>,
    listener_stats: ListenerStats,
    per_worker_stats: PerWorkerListenerStats,
    connections: Vec<ConnectionSocket>,
}

impl StreamListener {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        worker_id: usize,
        socket: ListenSocket,
        accepted_counter: AcceptedSocketCounter,
        connection_handler: Arc<dyn ConnectionHandler>,
        listener_stats: ListenerStats,
        per_worker_stats: PerWorkerListenerStats,
    ) -> Self {
        Self {
            name: name.into(),
            worker_id,
            socket,
            accepted_counter,
            connection_handler,
            listener_stats,
            per_worker_stats,
            connections: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Accept up to a batch of pending connections, then drop the ones whose
    /// peer has gone away. Returns how many connections were accepted or
    /// released.
    pub fn poll(&mut self, buf: &mut [u8]) -> usize {
        if !self.socket.is_open() {
            return 0;
        }
        let accepted = self.accept_batch();
        accepted + self.reap_closed(buf)
    }

    fn accept_batch(&mut self) -> usize {
        let mut accepted = 0;
        while accepted < ACCEPT_BATCH {
            match self.socket.accept(&self.accepted_counter) {
                Ok(connection) => {
                    accepted += 1;
                    debug!(
                        worker_id = self.worker_id,
                        listener = %self.name,
                        peer = ?connection.remote_address(),
                        "connection accepted"
                    );
                    self.listener_stats.downstream_cx_total.inc();
                    self.listener_stats.downstream_cx_active.inc();
                    self.per_worker_stats.downstream_cx_total.inc();
                    self.per_worker_stats.downstream_cx_active.inc();
                    self.connection_handler.inc_num_connections();
                    self.connections.push(connection);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(
                        worker_id = self.worker_id,
                        listener = %self.name,
                        error = %e,
                        "accept failed"
                    );
                    break;
                }
            }
        }
        accepted
    }

    /// Drop every connection whose peer closed it or that failed.
    fn reap_closed(&mut self, buf: &mut [u8]) -> usize {
        let mut released = 0;
        let mut i = 0;
        while i < self.connections.len() {
            if peer_closed(&self.connections[i], buf) {
                let connection = self.connections.swap_remove(i);
                debug!(
                    worker_id = self.worker_id,
                    listener = %self.name,
                    peer = ?connection.remote_address(),
                    "connection closed by peer"
                );
                self.release(connection);
                released += 1;
            } else {
                i += 1;
            }
        }
        released
    }

    fn release(&self, connection: ConnectionSocket) {
        drop(connection);
        self.listener_stats.downstream_cx_destroy.inc();
        self.listener_stats.downstream_cx_active.dec();
        self.per_worker_stats.downstream_cx_active.dec();
        self.connection_handler.dec_num_connections();
    }

    /// Release every held connection. Returns how many were released.
    pub fn shutdown(&mut self) -> usize {
        let connections = std::mem::take(&mut self.connections);
        let released = connections.len();
        for connection in connections {
            self.release(connection);
        }
        released
    }
}

/// Drain pending bytes and report whether the connection is finished.
fn peer_closed(connection: &ConnectionSocket, buf: &mut [u8]) -> bool {
    if buf.is_empty() {
        return false;
    }
    for _ in 0..DRAIN_READS {
        match connection.recv(buf) {
            Ok(0) => return true,
            Ok(_) => continue,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return true,
        }
    }
    false
}
