use super::*;
use crate::config::ListenerConfig;
use relayd_net::{
    Address, ListenSocketState, LiteralSocketOption, Socket, SocketError, SocketOptionState,
    SocketType, SystemSocketInterface,
};
use relayd_net::options::udp_gro_supported;
use std::sync::Arc;

fn iface() -> Arc<SystemSocketInterface> {
    Arc::new(SystemSocketInterface)
}

fn udp_listener(name: &str, address: &str, reuse_port: bool) -> ListenerConfig {
    ListenerConfig {
        name: name.to_string(),
        address: address.parse().unwrap(),
        socket_type: SocketType::Datagram,
        reuse_port,
        ..ListenerConfig::default()
    }
}

fn fd_of(socket: &relayd_net::ListenSocket) -> i32 {
    socket.io_handle().and_then(|h| h.fd()).unwrap()
}

mod options_tests {
    use super::*;

    #[test]
    fn test_datagram_listener_options() {
        let config = udp_listener("quic", "127.0.0.1:0", true);
        let expected = 3 + usize::from(udp_gro_supported());
        assert_eq!(build_listen_socket_options(&config).len(), expected);
    }

    #[test]
    fn test_stream_listener_options() {
        let config = ListenerConfig {
            socket_type: SocketType::Stream,
            reuse_port: false,
            transparent: true,
            freebind: true,
            socket_options: vec![LiteralSocketOption {
                state: SocketOptionState::Prebind,
                level: 1, // SOL_SOCKET
                name: 7,  // SO_SNDBUF
                int_value: 65536,
            }],
            ..ListenerConfig::default()
        };
        // Transparent contributes a prebind and a bound option.
        assert_eq!(build_listen_socket_options(&config).len(), 4);
    }

    #[test]
    fn test_pipe_listener_never_reuses_port() {
        let config = ListenerConfig {
            address: Address::Pipe("/tmp/relayd-test.sock".into()),
            socket_type: SocketType::Stream,
            reuse_port: true,
            ..ListenerConfig::default()
        };
        assert!(build_listen_socket_options(&config).is_empty());
    }
}

mod factory_tests {
    use super::*;

    #[test]
    fn test_shared_socket_is_duplicated_per_worker() {
        let config = udp_listener("shared", "127.0.0.1:0", false);
        let factory = ListenSocketFactory::from_config(iface(), &config).unwrap();

        let address = Arc::clone(factory.local_address());
        assert_ne!(address.port(), Some(0));
        assert!(factory.has_reserved_socket());

        let first = factory.get_listen_socket().unwrap();
        let second = factory.get_listen_socket().unwrap();
        assert_eq!(first.local_address(), address);
        assert_eq!(second.local_address(), address);
        assert_ne!(fd_of(&first), fd_of(&second));
        assert!(factory.has_reserved_socket());
    }

    #[test]
    fn test_port_zero_reservation_is_stolen_once() {
        let config = udp_listener("stolen", "127.0.0.1:0", true);
        let factory = ListenSocketFactory::from_config(iface(), &config).unwrap();
        let address = Arc::clone(factory.local_address());
        assert!(factory.has_reserved_socket());

        let first = factory.get_listen_socket().unwrap();
        assert!(!factory.has_reserved_socket());
        assert_eq!(first.local_address(), address);

        // Later workers bind their own SO_REUSEPORT socket to the same port.
        let second = factory.get_listen_socket().unwrap();
        assert_eq!(second.local_address(), address);
        assert_eq!(second.state(), ListenSocketState::Bound);
        assert_ne!(fd_of(&first), fd_of(&second));
    }

    #[test]
    fn test_fixed_port_with_reuse_port_creates_nothing_up_front() {
        let port = std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = udp_listener("fixed", &format!("127.0.0.1:{port}"), true);
        let factory = ListenSocketFactory::from_config(iface(), &config).unwrap();
        assert!(!factory.has_reserved_socket());
        assert_eq!(factory.local_address().port(), Some(port));

        let a = factory.get_listen_socket().unwrap();
        let b = factory.get_listen_socket().unwrap();
        assert_eq!(a.local_address().port(), Some(port));
        assert_eq!(b.local_address().port(), Some(port));
    }

    #[test]
    fn test_failing_bound_option_names_the_listener() {
        let mut config = udp_listener("bad_opts", "127.0.0.1:0", false);
        config.socket_options = vec![LiteralSocketOption {
            state: SocketOptionState::Bound,
            level: 0x7fff,
            name: 0x7fff,
            int_value: 1,
        }];

        match ListenSocketFactory::from_config(iface(), &config) {
            Err(SocketError::ListenerOptions(message)) => {
                assert_eq!(message, "bad_opts: Setting socket options failed");
            }
            other => panic!("expected an options error, got {other:?}"),
        }
    }

    #[test]
    fn test_unbound_stream_listener_stays_deferred() {
        let config = ListenerConfig {
            name: "redirected".to_string(),
            address: "127.0.0.1:0".parse().unwrap(),
            socket_type: SocketType::Stream,
            bind_to_port: false,
            reuse_port: false,
            ..ListenerConfig::default()
        };
        let factory = ListenSocketFactory::from_config(iface(), &config).unwrap();

        let socket = factory.get_listen_socket().unwrap();
        assert_eq!(socket.state(), ListenSocketState::Unopened);
        assert!(socket.io_handle().is_none());
        assert_eq!(socket.local_address().port(), Some(0));
    }

    #[test]
    fn test_pipe_listener_is_shared() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relayd.sock");
        let config = ListenerConfig {
            name: "uds".to_string(),
            address: Address::Pipe(path.clone()),
            socket_type: SocketType::Stream,
            reuse_port: true,
            ..ListenerConfig::default()
        };
        let factory = ListenSocketFactory::from_config(iface(), &config).unwrap();
        assert!(!factory.reuse_port());
        assert!(factory.has_reserved_socket());

        let a = factory.get_listen_socket().unwrap();
        let b = factory.get_listen_socket().unwrap();
        assert_eq!(a.local_address().pipe_path(), Some(path.as_path()));
        assert_ne!(fd_of(&a), fd_of(&b));
        assert!(factory.has_reserved_socket());
    }
}
