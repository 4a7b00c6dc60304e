use super::DispatcherHooks;
use crate::cid::{ConnectionId, ConnectionIdReplacer};
use crate::context::{ConnectionHandler, EventLoopHandle, ListenerContext};
use crate::error::{ConnectionCloseSource, QuicErrorCode};
use crate::session::{QuicSession, ServerSession};
use crate::stat_names::QuicStatNames;
use crate::version::QuicVersion;
use relayd_net::{Address, ListenSocket};
use relayd_stats::{ListenerStats, PerWorkerListenerStats};
use std::sync::Arc;
use tracing::debug;

/// Dispatcher hooks of one worker thread.
///
/// Holds shared handles to the listener-wide state and this worker's own
/// event loop and listen socket. Only the stats sinks are touched by other
/// workers, and those are atomic.
pub struct WorkerDispatcher {
    connection_handler: Arc<dyn ConnectionHandler>,
    listener_config: Arc<ListenerContext>,
    listener_stats: ListenerStats,
    per_worker_stats: PerWorkerListenerStats,
    event_loop: EventLoopHandle,
    listen_socket: Arc<ListenSocket>,
    quic_stat_names: Arc<QuicStatNames>,
    replacer: ConnectionIdReplacer,
}

impl WorkerDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connection_handler: Arc<dyn ConnectionHandler>,
        listener_config: Arc<ListenerContext>,
        listener_stats: ListenerStats,
        per_worker_stats: PerWorkerListenerStats,
        event_loop: EventLoopHandle,
        listen_socket: Arc<ListenSocket>,
        quic_stat_names: Arc<QuicStatNames>,
        replacer: ConnectionIdReplacer,
    ) -> Self {
        Self {
            connection_handler,
            listener_config,
            listener_stats,
            per_worker_stats,
            event_loop,
            listen_socket,
            quic_stat_names,
            replacer,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.event_loop.worker_id
    }

    pub fn connection_handler(&self) -> &dyn ConnectionHandler {
        self.connection_handler.as_ref()
    }
}

impl DispatcherHooks for WorkerDispatcher {
    fn create_quic_session(
        &self,
        server_connection_id: ConnectionId,
        self_address: &Address,
        peer_address: &Address,
        alpn: &str,
        version: QuicVersion,
        sni: &str,
    ) -> Box<dyn QuicSession> {
        let session = ServerSession::new(
            server_connection_id,
            Arc::new(self_address.clone()),
            Arc::new(peer_address.clone()),
            alpn,
            version,
            sni,
            self.event_loop,
            Arc::clone(&self.listen_socket),
        );

        self.listener_stats.downstream_cx_total.inc();
        self.listener_stats.downstream_cx_active.inc();
        self.per_worker_stats.downstream_cx_total.inc();
        self.per_worker_stats.downstream_cx_active.inc();
        self.connection_handler.inc_num_connections();

        Box::new(session)
    }

    fn on_connection_closed(
        &self,
        connection_id: &ConnectionId,
        error: QuicErrorCode,
        details: &str,
        source: ConnectionCloseSource,
    ) {
        debug!(
            worker_id = self.event_loop.worker_id,
            listener = self.listener_config.name(),
            cid = %connection_id,
            %error,
            ?source,
            details,
            "quic connection closed"
        );

        self.listener_stats.downstream_cx_destroy.inc();
        self.listener_stats.downstream_cx_active.dec();
        self.per_worker_stats.downstream_cx_active.dec();
        self.connection_handler.dec_num_connections();
        self.quic_stat_names.charge_connection_close_stat(
            self.listener_config.listener_scope(),
            error,
            source,
            false,
        );
    }

    fn replace_long_server_connection_id(
        &self,
        _version: QuicVersion,
        server_connection_id: &ConnectionId,
        expected_server_connection_id_length: usize,
    ) -> ConnectionId {
        self.replacer
            .replace(server_connection_id, expected_server_connection_id_length)
    }
}
