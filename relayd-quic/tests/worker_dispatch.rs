use relayd_net::{Address, ListenSocket, Socket, SystemSocketInterface};
use relayd_quic::version::VERSION_1;
use relayd_quic::{
    ConnectionCloseSource, ConnectionCounter, ConnectionHandler, ConnectionId, ConnectionIdReplacer,
    DispatcherConfig, DispatcherHooks, EventLoopHandle, ListenerContext, PacketDisposition,
    QuicDispatcher, QuicErrorCode, QuicStatNames, QuicVersion, ServerSession, WorkerDispatcher,
    ROUTING_PREFIX_LEN,
};
use relayd_stats::{ListenerStats, PerWorkerListenerStats, Store};
use std::sync::Arc;
use std::time::Instant;

struct Harness {
    store: Store,
    handler: Arc<ConnectionCounter>,
    dispatcher: QuicDispatcher<WorkerDispatcher>,
}

fn harness(worker_id: usize, stat_names: Arc<QuicStatNames>) -> Harness {
    let store = Store::new();
    let listener_scope = store.root_scope().create_scope("listener.quic_test");
    let listener = Arc::new(ListenerContext::new("quic_test", Arc::clone(&listener_scope)));
    let socket = ListenSocket::udp(
        &SystemSocketInterface,
        Arc::new("127.0.0.1:0".parse().unwrap()),
        &[],
        true,
    )
    .unwrap();
    let self_address = socket.local_address();
    let handler = Arc::new(ConnectionCounter::new());

    let hooks = WorkerDispatcher::new(
        Arc::clone(&handler) as Arc<dyn ConnectionHandler>,
        listener,
        ListenerStats::new(listener_scope.as_ref()),
        PerWorkerListenerStats::new(listener_scope.as_ref(), worker_id),
        EventLoopHandle::new(worker_id),
        Arc::new(socket),
        stat_names,
        ConnectionIdReplacer::with_keys(11, 22),
    );
    Harness {
        store,
        handler,
        dispatcher: QuicDispatcher::new(hooks, DispatcherConfig::default(), self_address),
    }
}

fn client_initial(dcid: &[u8]) -> Vec<u8> {
    let mut packet = vec![0xc0];
    packet.extend_from_slice(&VERSION_1.to_be_bytes());
    packet.push(dcid.len() as u8);
    packet.extend_from_slice(dcid);
    packet.push(0);
    packet.resize(1200, 0);
    packet
}

fn peer() -> Address {
    "127.0.0.1:40001".parse().unwrap()
}

#[test]
fn create_and_close_update_stats_and_handler() {
    let mut h = harness(2, Arc::new(QuicStatNames::new()));
    let now = Instant::now();

    let PacketDisposition::SessionCreated(id) =
        h.dispatcher.process_packet(&peer(), &client_initial(&[5; 8]), now)
    else {
        panic!("expected a new session");
    };
    assert_eq!(h.handler.num_connections(), 1);
    assert_eq!(h.store.counter_value("listener.quic_test.downstream_cx_total"), Some(1));
    assert_eq!(h.store.gauge_value("listener.quic_test.downstream_cx_active"), Some(1));
    assert_eq!(
        h.store.counter_value("listener.quic_test.worker_2.downstream_cx_total"),
        Some(1)
    );

    assert!(h.dispatcher.close_connection(
        &id,
        QuicErrorCode::NoError,
        "done",
        ConnectionCloseSource::FromSelf
    ));
    assert_eq!(h.handler.num_connections(), 0);
    assert_eq!(h.store.gauge_value("listener.quic_test.downstream_cx_active"), Some(0));
    assert_eq!(
        h.store.gauge_value("listener.quic_test.worker_2.downstream_cx_active"),
        Some(0)
    );
    assert_eq!(h.store.counter_value("listener.quic_test.downstream_cx_destroy"), Some(1));
    assert_eq!(
        h.store.counter_value(
            "listener.quic_test.http3.downstream.tx.quic_connection_close_error_code_QUIC_NO_ERROR"
        ),
        Some(1)
    );
}

#[test]
fn replaced_ids_keep_the_routing_prefix() {
    let h = harness(0, Arc::new(QuicStatNames::new()));
    let original = ConnectionId::from_slice(&[0xca, 0xfe, 0xf0, 0x0d, 1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();

    for expected_len in [4usize, 8, 16, 20] {
        let replaced = h.dispatcher.hooks().replace_long_server_connection_id(
            QuicVersion::V1,
            &original,
            expected_len,
        );
        assert_eq!(replaced.len(), expected_len);
        assert_eq!(
            &replaced.as_bytes()[..ROUTING_PREFIX_LEN],
            &original.as_bytes()[..ROUTING_PREFIX_LEN]
        );
    }
}

#[test]
fn workers_share_one_stat_name_cache() {
    let names = Arc::new(QuicStatNames::new());
    let mut a = harness(0, Arc::clone(&names));
    let mut b = harness(1, Arc::clone(&names));
    let now = Instant::now();

    for (h, dcid) in [(&mut a, [1u8; 8]), (&mut b, [2u8; 8])] {
        h.dispatcher.process_packet(&peer(), &client_initial(&dcid), now);
        h.dispatcher.close_all(QuicErrorCode::PeerGoingAway, "shutdown");
    }

    let after_first_round = names.interned_len();
    a.dispatcher.process_packet(&peer(), &client_initial(&[3; 8]), now);
    a.dispatcher.close_all(QuicErrorCode::PeerGoingAway, "shutdown");
    assert_eq!(names.interned_len(), after_first_round);
}

#[test]
fn session_sends_through_the_worker_socket() {
    let socket = Arc::new(
        ListenSocket::udp(
            &SystemSocketInterface,
            Arc::new("127.0.0.1:0".parse().unwrap()),
            &[],
            true,
        )
        .unwrap(),
    );
    let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    client
        .set_read_timeout(Some(std::time::Duration::from_secs(2)))
        .unwrap();
    let client_address: Address = client.local_addr().unwrap().into();

    let session = ServerSession::new(
        ConnectionId::from_slice(&[9; 8]).unwrap(),
        socket.local_address(),
        Arc::new(client_address),
        "h3",
        QuicVersion::V1,
        "Edge.Example.COM",
        EventLoopHandle::new(4),
        Arc::clone(&socket),
    );
    assert_eq!(session.sni(), "edge.example.com");
    assert_eq!(session.worker_id(), 4);

    assert_eq!(session.send(b"retry later").unwrap(), 11);
    let mut buf = [0u8; 32];
    let (len, from) = client.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..len], b"retry later");
    assert_eq!(Some(from), socket.local_address().ip());
}
