//! Server-side QUIC sessions owned by a dispatcher.

use crate::cid::ConnectionId;
use crate::context::EventLoopHandle;
use crate::error::QuicErrorCode;
use crate::version::QuicVersion;
use relayd_net::{Address, ListenSocket};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A connection as seen by the dispatcher.
///
/// The transport state machine lives behind this trait; the dispatcher only
/// feeds datagrams, checks idleness and closes.
pub trait QuicSession: Send + fmt::Debug {
    fn connection_id(&self) -> &ConnectionId;

    fn process_packet(&mut self, peer: &Address, packet: &[u8], now: Instant);

    fn last_activity(&self) -> Instant;

    fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity()) >= idle_timeout
    }

    /// Close the session. Closing twice keeps the first reason.
    fn close(&mut self, error: QuicErrorCode, details: &str);

    fn close_reason(&self) -> Option<(QuicErrorCode, &str)>;
}

/// Session created by a worker for one downstream connection.
pub struct ServerSession {
    connection_id: ConnectionId,
    self_address: Arc<Address>,
    peer_address: Arc<Address>,
    alpn: String,
    sni: String,
    version: QuicVersion,
    event_loop: EventLoopHandle,
    listen_socket: Arc<ListenSocket>,
    last_activity: Instant,
    packets_received: u64,
    bytes_received: u64,
    close: Option<(QuicErrorCode, String)>,
}

impl ServerSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connection_id: ConnectionId,
        self_address: Arc<Address>,
        peer_address: Arc<Address>,
        alpn: &str,
        version: QuicVersion,
        sni: &str,
        event_loop: EventLoopHandle,
        listen_socket: Arc<ListenSocket>,
    ) -> Self {
        let now = Instant::now();
        Self {
            connection_id,
            self_address,
            peer_address,
            alpn: alpn.to_string(),
            sni: sni.to_ascii_lowercase(),
            version,
            event_loop,
            listen_socket,
            last_activity: now,
            packets_received: 0,
            bytes_received: 0,
            close: None,
        }
    }

    pub fn self_address(&self) -> &Address {
        &self.self_address
    }

    pub fn peer_address(&self) -> &Address {
        &self.peer_address
    }

    pub fn alpn(&self) -> &str {
        &self.alpn
    }

    pub fn sni(&self) -> &str {
        &self.sni
    }

    pub fn version(&self) -> QuicVersion {
        self.version
    }

    pub fn worker_id(&self) -> usize {
        self.event_loop.worker_id
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Send a datagram to the peer through the worker's listen socket.
    pub fn send(&self, datagram: &[u8]) -> io::Result<usize> {
        self.listen_socket.send_to(datagram, &self.peer_address)
    }
}

impl QuicSession for ServerSession {
    fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    fn process_packet(&mut self, peer: &Address, packet: &[u8], now: Instant) {
        if self.close.is_some() {
            return;
        }
        if *peer != *self.peer_address {
            // Path migration: later sends follow the new address.
            tracing::debug!(cid = %self.connection_id, from = %self.peer_address, to = %peer, "peer address changed");
            self.peer_address = Arc::new(peer.clone());
        }
        self.packets_received += 1;
        self.bytes_received += packet.len() as u64;
        self.last_activity = now;
    }

    fn last_activity(&self) -> Instant {
        self.last_activity
    }

    fn close(&mut self, error: QuicErrorCode, details: &str) {
        if self.close.is_none() {
            self.close = Some((error, details.to_string()));
        }
    }

    fn close_reason(&self) -> Option<(QuicErrorCode, &str)> {
        self.close.as_ref().map(|(code, details)| (*code, details.as_str()))
    }
}

impl fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSession")
            .field("connection_id", &self.connection_id)
            .field("peer_address", &self.peer_address.as_string())
            .field("version", &self.version)
            .field("worker_id", &self.event_loop.worker_id)
            .field("packets_received", &self.packets_received)
            .field("close", &self.close)
            .finish()
    }
}
