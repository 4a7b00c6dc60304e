//! Datagram dispatch to QUIC sessions.
//!
//! [`QuicDispatcher`] owns the sessions of one worker. It routes each
//! datagram by destination connection ID, creates sessions for acceptable
//! client Initials and tears sessions down. Everything that depends on the
//! server around it (session construction, close accounting, connection-ID
//! replacement) goes through [`DispatcherHooks`].

mod worker;


pub use worker::WorkerDispatcher;

use crate::cid::ConnectionId;
use crate::crypto_helper::{CryptoServerStreamHelper, CryptoStreamHelper, ParsedClientHello};
use crate::error::{ConnectionCloseSource, QuicErrorCode};
use crate::packet::{parse_header, PacketHeader, MIN_CLIENT_INITIAL_DCID_LEN, MIN_INITIAL_PACKET_SIZE};
use crate::session::QuicSession;
use crate::version::QuicVersion;
use ahash::AHashMap;
use relayd_net::Address;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Server-specific behaviour plugged into the dispatcher.
pub trait DispatcherHooks: Send {
    /// Build the session for a newly accepted connection.
    fn create_quic_session(
        &self,
        server_connection_id: ConnectionId,
        self_address: &Address,
        peer_address: &Address,
        alpn: &str,
        version: QuicVersion,
        sni: &str,
    ) -> Box<dyn QuicSession>;

    /// Called once per session, before the dispatcher drops it.
    fn on_connection_closed(
        &self,
        connection_id: &ConnectionId,
        error: QuicErrorCode,
        details: &str,
        source: ConnectionCloseSource,
    );

    /// Server connection ID to use when the client's choice has the wrong
    /// length.
    fn replace_long_server_connection_id(
        &self,
        version: QuicVersion,
        server_connection_id: &ConnectionId,
        expected_server_connection_id_length: usize,
    ) -> ConnectionId;
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Length of the connection IDs this server issues.
    pub expected_server_connection_id_length: usize,
    pub supported_versions: Vec<QuicVersion>,
    pub idle_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            expected_server_connection_id_length: 8,
            supported_versions: QuicVersion::ALL.to_vec(),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    Malformed,
    UnknownConnection,
    UnsupportedVersion,
    NotInitial,
    TooSmall,
    ShortConnectionId,
}

/// What happened to one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketDisposition {
    /// Routed to an existing session.
    Delivered(ConnectionId),
    /// Started a new session under this server connection ID.
    SessionCreated(ConnectionId),
    /// The client hello was refused.
    Rejected(String),
    Dropped(DropReason),
}

/// Counters kept by a dispatcher, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub sessions_created: u64,
    pub sessions_rejected: u64,
    pub sessions_closed: u64,
}

pub struct QuicDispatcher<H> {
    hooks: H,
    helper: Box<dyn CryptoStreamHelper>,
    config: DispatcherConfig,
    self_address: Arc<Address>,
    sessions: AHashMap<ConnectionId, Box<dyn QuicSession>>,
    /// Client-chosen connection ID to the replacement it was given.
    replaced_ids: AHashMap<ConnectionId, ConnectionId>,
    stats: DispatchStats,
}

impl<H: DispatcherHooks> QuicDispatcher<H> {
    pub fn new(hooks: H, config: DispatcherConfig, self_address: Arc<Address>) -> Self {
        Self::with_helper(hooks, Box::new(CryptoServerStreamHelper), config, self_address)
    }

    pub fn with_helper(
        hooks: H,
        helper: Box<dyn CryptoStreamHelper>,
        config: DispatcherConfig,
        self_address: Arc<Address>,
    ) -> Self {
        Self {
            hooks,
            helper,
            config,
            self_address,
            sessions: AHashMap::new(),
            replaced_ids: AHashMap::new(),
            stats: DispatchStats::default(),
        }
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn has_session(&self, connection_id: &ConnectionId) -> bool {
        self.resolve(connection_id).is_some()
    }

    pub fn session(&self, connection_id: &ConnectionId) -> Option<&dyn QuicSession> {
        let id = self.resolve(connection_id)?;
        self.sessions.get(&id).map(|s| s.as_ref())
    }

    fn resolve(&self, connection_id: &ConnectionId) -> Option<ConnectionId> {
        if self.sessions.contains_key(connection_id) {
            return Some(connection_id.clone());
        }
        self.replaced_ids
            .get(connection_id)
            .filter(|id| self.sessions.contains_key(*id))
            .cloned()
    }

    fn drop_packet(&mut self, reason: DropReason) -> PacketDisposition {
        self.stats.packets_dropped += 1;
        trace!(?reason, "dropping packet");
        PacketDisposition::Dropped(reason)
    }

    /// Route one datagram received from `peer`.
    pub fn process_packet(&mut self, peer: &Address, packet: &[u8], now: Instant) -> PacketDisposition {
        self.stats.packets_received += 1;

        let header = match parse_header(packet, self.config.expected_server_connection_id_length) {
            Ok(header) => header,
            Err(e) => {
                trace!(error = %e, %peer, "malformed packet header");
                return self.drop_packet(DropReason::Malformed);
            }
        };

        if let Some(id) = self.resolve(header.dcid()) {
            if let Some(session) = self.sessions.get_mut(&id) {
                session.process_packet(peer, packet, now);
            }
            return PacketDisposition::Delivered(id);
        }

        let dcid = match &header {
            PacketHeader::Short { .. } => return self.drop_packet(DropReason::UnknownConnection),
            PacketHeader::Long { dcid, .. } => dcid.clone(),
        };
        let version = match header.quic_version() {
            Some(v) if self.config.supported_versions.contains(&v) => v,
            // Version negotiation needs packet serialization, which lives
            // outside the dispatcher.
            _ => return self.drop_packet(DropReason::UnsupportedVersion),
        };
        if !header.is_initial() {
            return self.drop_packet(DropReason::NotInitial);
        }
        if packet.len() < MIN_INITIAL_PACKET_SIZE {
            return self.drop_packet(DropReason::TooSmall);
        }
        if dcid.len() < MIN_CLIENT_INITIAL_DCID_LEN {
            return self.drop_packet(DropReason::ShortConnectionId);
        }

        let chlo = ParsedClientHello {
            version,
            connection_id: dcid.clone(),
            sni: String::new(),
            alpn: Vec::new(),
        };
        let decision = self
            .helper
            .can_accept_client_hello(&chlo, peer, peer, &self.self_address);
        if !decision.accepted {
            self.stats.sessions_rejected += 1;
            debug!(%peer, details = %decision.details, "client hello rejected");
            return PacketDisposition::Rejected(decision.details);
        }

        let expected_len = self.config.expected_server_connection_id_length;
        let server_id = if dcid.len() != expected_len {
            let replaced = self
                .hooks
                .replace_long_server_connection_id(version, &dcid, expected_len);
            self.replaced_ids.insert(dcid.clone(), replaced.clone());
            replaced
        } else {
            dcid
        };

        let mut session = self.hooks.create_quic_session(
            server_id.clone(),
            &self.self_address,
            peer,
            &chlo.alpn.join(","),
            version,
            &chlo.sni,
        );
        session.process_packet(peer, packet, now);
        self.sessions.insert(server_id.clone(), session);
        self.stats.sessions_created += 1;
        debug!(cid = %server_id, %peer, ?version, "session created");

        PacketDisposition::SessionCreated(server_id)
    }

    /// Close and remove a session. Returns `false` if there was none.
    pub fn close_connection(
        &mut self,
        connection_id: &ConnectionId,
        error: QuicErrorCode,
        details: &str,
        source: ConnectionCloseSource,
    ) -> bool {
        let Some(id) = self.resolve(connection_id) else {
            return false;
        };
        let Some(mut session) = self.sessions.remove(&id) else {
            return false;
        };
        session.close(error, details);
        self.hooks.on_connection_closed(&id, error, details, source);
        self.replaced_ids.retain(|_, replaced| *replaced != id);
        self.stats.sessions_closed += 1;
        debug!(cid = %id, %error, ?source, details, "session closed");
        true
    }

    /// Close every session idle for at least the configured timeout.
    pub fn close_idle_sessions(&mut self, now: Instant) -> usize {
        let idle_timeout = self.config.idle_timeout;
        let idle: Vec<ConnectionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.is_idle(now, idle_timeout))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &idle {
            self.close_connection(
                id,
                QuicErrorCode::NetworkIdleTimeout,
                "idle timeout",
                ConnectionCloseSource::FromSelf,
            );
        }
        idle.len()
    }

    /// Close every session, e.g. on shutdown.
    pub fn close_all(&mut self, error: QuicErrorCode, details: &str) -> usize {
        let ids: Vec<ConnectionId> = self.sessions.keys().cloned().collect();
        for id in &ids {
            self.close_connection(id, error, details, ConnectionCloseSource::FromSelf);
        }
        ids.len()
    }
}

impl<H> Drop for QuicDispatcher<H> {
    fn drop(&mut self) {
        if !self.sessions.is_empty() {
            debug!(sessions = self.sessions.len(), "dispatcher dropped with open sessions");
        }
    }
}
