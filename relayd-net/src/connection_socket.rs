//! Connection sockets: accepted downstream connections and client sockets.

use crate::address::Address;
use crate::io_handle::IoHandle;
use crate::options::SocketOption;
use crate::socket::{Socket, SocketImpl, SocketType};
use crate::socket_interface::{SocketInterface, SystemSocketInterface};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Number of accepted sockets currently alive, shared by every worker.
#[derive(Debug, Clone, Default)]
pub struct AcceptedSocketCounter {
    count: Arc<AtomicU64>,
}

impl AcceptedSocketCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn decrement(&self) {
        if self
            .count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_err()
        {
            panic!("accepted socket count underflow");
        }
    }
}

/// Keeps one unit of the accepted count for as long as it lives.
struct AcceptedSocketGuard {
    counter: AcceptedSocketCounter,
}

impl AcceptedSocketGuard {
    fn new(counter: &AcceptedSocketCounter) -> Self {
        counter.increment();
        Self {
            counter: counter.clone(),
        }
    }
}

impl Drop for AcceptedSocketGuard {
    fn drop(&mut self) {
        self.counter.decrement();
    }
}

enum Origin {
    Accepted(#[allow(dead_code)] AcceptedSocketGuard),
    Client,
}

/// One established (or establishing) connection.
pub struct ConnectionSocket {
    socket: SocketImpl,
    origin: Origin,
    transport_protocol: String,
    application_protocols: Vec<String>,
    server_name: String,
}

impl ConnectionSocket {
    /// Wrap a handle returned by `accept()`. The counter is incremented now
    /// and decremented when the socket is dropped.
    pub fn accepted(
        handle: IoHandle,
        local_address: Arc<Address>,
        remote_address: Arc<Address>,
        counter: &AcceptedSocketCounter,
    ) -> Self {
        Self::with_origin(
            SocketImpl::new(
                Some(handle),
                SocketType::Stream,
                local_address,
                Some(remote_address),
            ),
            Origin::Accepted(AcceptedSocketGuard::new(counter)),
        )
    }

    /// Open a stream socket towards `remote_address`. Call
    /// [`ConnectionSocket::connect`] to start connecting.
    pub fn client(remote_address: Arc<Address>, options: &[Arc<dyn SocketOption>]) -> io::Result<Self> {
        Self::client_with(&SystemSocketInterface, remote_address, options)
    }

    pub fn client_with(
        iface: &dyn SocketInterface,
        remote_address: Arc<Address>,
        options: &[Arc<dyn SocketOption>],
    ) -> io::Result<Self> {
        let handle = iface.socket(SocketType::Stream, &remote_address)?;
        let local_address = Arc::new(remote_address.unspecified_like());
        let mut socket = SocketImpl::new(
            Some(handle),
            SocketType::Stream,
            local_address,
            Some(remote_address),
        );
        socket.add_options(options);
        Ok(Self::with_origin(socket, Origin::Client))
    }

    fn with_origin(socket: SocketImpl, origin: Origin) -> Self {
        Self {
            socket,
            origin,
            transport_protocol: String::new(),
            application_protocols: Vec::new(),
            server_name: String::new(),
        }
    }

    /// Start a non-blocking connect to the remote address. A connect still in
    /// progress counts as success.
    pub fn connect(&self) -> io::Result<()> {
        let remote = self
            .remote_address()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no remote address"))?;
        let handle = self
            .socket
            .io_handle()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))?;
        match handle.connect(&remote) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Non-blocking read of whatever the peer has sent. `Ok(0)` means the
    /// peer closed the connection.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket
            .io_handle()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))?
            .recv(buf)
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self.origin, Origin::Accepted(_))
    }

    pub fn set_detected_transport_protocol(&mut self, protocol: &str) {
        self.transport_protocol = protocol.to_string();
    }

    pub fn detected_transport_protocol(&self) -> &str {
        &self.transport_protocol
    }

    pub fn set_requested_application_protocols(&mut self, protocols: &[&str]) {
        self.application_protocols = protocols.iter().map(|p| p.to_string()).collect();
    }

    pub fn requested_application_protocols(&self) -> &[String] {
        &self.application_protocols
    }

    /// Server names are case-insensitive and kept lower-case.
    pub fn set_requested_server_name(&mut self, server_name: &str) {
        self.server_name = server_name.to_ascii_lowercase();
    }

    pub fn requested_server_name(&self) -> &str {
        &self.server_name
    }

    pub fn last_round_trip_time(&self) -> Option<Duration> {
        self.socket.io_handle()?.last_round_trip_time()
    }
}

impl Socket for ConnectionSocket {
    fn socket_impl(&self) -> &SocketImpl {
        &self.socket
    }

    fn socket_impl_mut(&mut self) -> &mut SocketImpl {
        &mut self.socket
    }
}

impl fmt::Debug for ConnectionSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSocket")
            .field("accepted", &self.is_accepted())
            .field("transport_protocol", &self.transport_protocol)
            .field("server_name", &self.server_name)
            .field("local_address", &self.local_address().as_string())
            .field(
                "remote_address",
                &self.remote_address().map(|a| a.as_string()),
            )
            .field("io_handle", &self.socket.io_handle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket_interface::io_handle_for_addr;
    use std::thread;

    fn accepted(counter: &AcceptedSocketCounter) -> ConnectionSocket {
        let local: Arc<Address> = Arc::new("127.0.0.1:0".parse().unwrap());
        let handle = io_handle_for_addr(SocketType::Stream, &local).unwrap();
        let remote = Arc::new("127.0.0.1:40000".parse().unwrap());
        ConnectionSocket::accepted(handle, local, remote, counter)
    }

    #[test]
    fn test_counter_tracks_live_sockets() {
        let counter = AcceptedSocketCounter::new();
        assert_eq!(counter.count(), 0);

        let mut sockets: Vec<_> = (0..5).map(|_| accepted(&counter)).collect();
        assert_eq!(counter.count(), 5);
        sockets.truncate(2);
        assert_eq!(counter.count(), 2);
        drop(sockets);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_counter_under_concurrency() {
        let counter = AcceptedSocketCounter::new();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    let mut kept = Vec::new();
                    for i in 0..50 {
                        let socket = accepted(&counter);
                        if i % 5 == 0 {
                            kept.push(socket);
                        }
                    }
                    kept
                })
            })
            .collect();

        let kept: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        assert_eq!(counter.count(), 8 * 10);
        drop(kept);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    #[should_panic(expected = "accepted socket count underflow")]
    fn test_counter_underflow_panics() {
        let counter = AcceptedSocketCounter::new();
        counter.decrement();
    }

    #[test]
    fn test_server_name_is_lower_cased() {
        let counter = AcceptedSocketCounter::new();
        let mut socket = accepted(&counter);
        socket.set_requested_server_name("ExAmple.COM");
        assert_eq!(socket.requested_server_name(), "example.com");
    }

    #[test]
    fn test_application_protocols_are_copied() {
        let counter = AcceptedSocketCounter::new();
        let mut socket = accepted(&counter);
        let protocols = vec![String::from("h3"), String::from("hq-interop")];
        let borrowed: Vec<&str> = protocols.iter().map(String::as_str).collect();
        socket.set_requested_application_protocols(&borrowed);
        drop(borrowed);
        drop(protocols);
        assert_eq!(socket.requested_application_protocols(), ["h3", "hq-interop"]);

        socket.set_detected_transport_protocol("tls");
        assert_eq!(socket.detected_transport_protocol(), "tls");
        assert!(format!("{socket:?}").contains("\"tls\""));
    }

    #[test]
    fn test_client_connects_to_local_listener() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let remote = Arc::new(Address::from(listener.local_addr().unwrap()));

        let client = ConnectionSocket::client(remote, &[]).unwrap();
        client.connect().unwrap();

        let (_server_side, peer) = listener.accept().unwrap();
        assert_eq!(peer.ip(), listener.local_addr().unwrap().ip());
        assert!(!client.is_accepted());
    }

    #[test]
    fn test_connect_without_listener_is_refused_eventually() {
        let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let remote = Arc::new(Address::from(unused.local_addr().unwrap()));
        drop(unused);

        let client = ConnectionSocket::client(remote, &[]).unwrap();
        // Loopback refusals may surface immediately or on the first read.
        let refused = client.connect().is_err() || {
            thread::sleep(std::time::Duration::from_millis(50));
            let mut buf = [0u8; 1];
            client.recv(&mut buf).is_err()
        };
        assert!(refused);
    }

    #[test]
    fn test_client_socket_is_not_counted() {
        let counter = AcceptedSocketCounter::new();
        let remote = Arc::new("127.0.0.1:9".parse().unwrap());
        let socket = ConnectionSocket::client(remote, &[]).unwrap();
        assert!(!socket.is_accepted());
        assert_eq!(counter.count(), 0);
        assert_eq!(socket.local_address().ip().unwrap().port(), 0);
    }
}
