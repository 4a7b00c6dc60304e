use super::*;
use crate::config::{ListenerConfig, RelaydConfig};
use relayd_net::SystemSocketInterface;
use std::io::Write;
use std::net::{TcpStream, UdpSocket};

const QUIC_V1: u32 = 0x0000_0001;

fn test_config(workers: usize) -> RelaydConfig {
    let mut config = RelaydConfig {
        listeners: vec![
            ListenerConfig {
                name: "quic".to_string(),
                address: "127.0.0.1:0".parse().unwrap(),
                socket_type: SocketType::Datagram,
                ..ListenerConfig::default()
            },
            ListenerConfig {
                name: "tcp".to_string(),
                address: "127.0.0.1:0".parse().unwrap(),
                socket_type: SocketType::Stream,
                ..ListenerConfig::default()
            },
        ],
        ..RelaydConfig::default()
    };
    config.global.workers.count = workers;
    config.global.workers.pin_to_cpu = false;
    config
}

fn resources() -> WorkerResources {
    WorkerResources::new(
        Store::new(),
        AcceptedSocketCounter::new(),
        Arc::new(SystemSocketInterface),
    )
}

fn address_of(set: &WorkerSet, name: &str) -> std::net::SocketAddr {
    set.listener_addresses()
        .iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, a)| a.ip())
        .unwrap()
}

fn client_initial(dcid: &[u8]) -> Vec<u8> {
    let mut packet = vec![0xc0];
    packet.extend_from_slice(&QUIC_V1.to_be_bytes());
    packet.push(dcid.len() as u8);
    packet.extend_from_slice(dcid);
    packet.push(0);
    packet.resize(1200, 0);
    packet
}

/// Poll every worker until `done` holds or two seconds pass.
fn poll_until(set: &mut WorkerSet, mut done: impl FnMut(&WorkerSet) -> bool) -> bool {
    let mut buf = vec![0u8; 65527];
    for _ in 0..200 {
        for worker in set.workers_mut() {
            worker.poll_once(&mut buf);
        }
        if done(set) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_every_worker_gets_every_listener() {
    let set = WorkerSet::build(&test_config(2), &resources()).unwrap();

    assert_eq!(set.workers().len(), 2);
    for worker in set.workers() {
        assert_eq!(worker.datagram_listeners().len(), 1);
        assert_eq!(worker.stream_listeners().len(), 1);
    }
    assert_ne!(address_of(&set, "quic").port(), 0);
    assert_ne!(address_of(&set, "tcp").port(), 0);
}

#[test]
fn test_zero_workers_rejected() {
    let mut config = test_config(1);
    config.global.workers.count = 0;
    assert!(WorkerSet::build(&config, &resources()).is_err());
}

#[test]
fn test_initial_creates_session_and_stop_closes_it() {
    let resources = resources();
    let store = resources.store.clone();
    let mut set = WorkerSet::build(&test_config(2), &resources).unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client
        .send_to(&client_initial(&[0x5a; 8]), address_of(&set, "quic"))
        .unwrap();

    let created = poll_until(&mut set, |set| {
        set.workers()
            .iter()
            .map(|w| w.connection_handler().num_connections())
            .sum::<u64>()
            == 1
    });
    assert!(created, "no worker created a session");
    assert_eq!(store.counter_value("listener.quic.downstream_cx_total"), Some(1));
    assert_eq!(store.gauge_value("listener.quic.downstream_cx_active"), Some(1));

    for worker in set.workers_mut() {
        worker.stop();
    }
    assert_eq!(store.gauge_value("listener.quic.downstream_cx_active"), Some(0));
    assert_eq!(store.counter_value("listener.quic.downstream_cx_destroy"), Some(1));
    assert_eq!(
        store.counter_value(
            "listener.quic.http3.downstream.tx.quic_connection_close_error_code_QUIC_PEER_GOING_AWAY"
        ),
        Some(1)
    );
}

#[test]
fn test_accepted_connections_are_counted_and_released() {
    let resources = resources();
    let store = resources.store.clone();
    let accepted = resources.accepted.clone();
    let mut set = WorkerSet::build(&test_config(2), &resources).unwrap();

    let mut clients = Vec::new();
    for _ in 0..3 {
        let mut stream = TcpStream::connect(address_of(&set, "tcp")).unwrap();
        stream.write_all(b"hello").unwrap();
        clients.push(stream);
    }

    assert!(poll_until(&mut set, |_| accepted.count() == 3));
    assert_eq!(store.counter_value("listener.tcp.downstream_cx_total"), Some(3));
    let held: usize = set
        .workers()
        .iter()
        .map(|w| w.stream_listeners()[0].connection_count())
        .sum();
    assert_eq!(held, 3);

    for worker in set.workers_mut() {
        worker.stop();
    }
    assert_eq!(accepted.count(), 0);
    assert_eq!(store.gauge_value("listener.tcp.downstream_cx_active"), Some(0));
    assert_eq!(store.counter_value("listener.tcp.downstream_cx_destroy"), Some(3));
}

#[test]
fn test_unbound_stream_listener_accepts_nothing() {
    let mut config = test_config(1);
    config.listeners[1].bind_to_port = false;
    config.listeners[1].reuse_port = false;
    let mut set = WorkerSet::build(&config, &resources()).unwrap();

    let mut buf = vec![0u8; 2048];
    assert_eq!(set.workers_mut()[0].poll_once(&mut buf), 0);
}

#[test]
fn test_connections_closed_by_peer_are_released() {
    let resources = resources();
    let store = resources.store.clone();
    let accepted = resources.accepted.clone();
    let mut set = WorkerSet::build(&test_config(1), &resources).unwrap();
    let tcp = address_of(&set, "tcp");

    let mut buf = vec![0u8; 2048];
    let mut clients = Vec::new();
    for i in 0..20 {
        let mut stream = TcpStream::connect(tcp).unwrap();
        if i % 2 == 0 {
            stream.write_all(b"bytes nobody reads").unwrap();
        }
        clients.push(stream);
        set.workers_mut()[0].poll_once(&mut buf);
    }
    assert!(poll_until(&mut set, |_| accepted.count() == 20));

    drop(clients);

    assert!(poll_until(&mut set, |_| accepted.count() == 0));
    assert_eq!(set.workers()[0].stream_listeners()[0].connection_count(), 0);
    assert_eq!(set.workers()[0].connection_handler().num_connections(), 0);
    assert_eq!(store.counter_value("listener.tcp.downstream_cx_total"), Some(20));
    assert_eq!(store.counter_value("listener.tcp.downstream_cx_destroy"), Some(20));
    assert_eq!(store.gauge_value("listener.tcp.downstream_cx_active"), Some(0));
}
