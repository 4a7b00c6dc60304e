//! Listening sockets: stream, datagram and unix-domain.
//!
//! The variants share one lifecycle and differ only in the policy described
//! by [`ListenSocketKind`]: whether the OS handle is opened at construction,
//! which options must precede `bind()`, and which socket type is created.

use crate::address::Address;
use crate::connection_socket::{AcceptedSocketCounter, ConnectionSocket};
use crate::error::{Result, SocketError};
use crate::io_handle::IoHandle;
use crate::options::{apply_options, SocketOption, SocketOptionState};
use crate::socket::{Socket, SocketImpl, SocketType};
use crate::socket_interface::SocketInterface;
use std::io;
use std::sync::Arc;
use tracing::{debug, trace};

const OPTIONS_FAILED: &str = "ListenSocket: Setting socket options failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenSocketKind {
    Stream,
    Datagram,
    UnixDomain,
}

impl ListenSocketKind {
    /// Kind used for a network address of the given type.
    pub fn for_address(address: &Address, socket_type: SocketType) -> Self {
        match (address.is_pipe(), socket_type) {
            (true, _) => ListenSocketKind::UnixDomain,
            (false, SocketType::Stream) => ListenSocketKind::Stream,
            (false, SocketType::Datagram) => ListenSocketKind::Datagram,
        }
    }

    pub fn socket_type(self) -> SocketType {
        match self {
            ListenSocketKind::Stream | ListenSocketKind::UnixDomain => SocketType::Stream,
            ListenSocketKind::Datagram => SocketType::Datagram,
        }
    }

    /// Whether the OS handle exists right after construction.
    pub fn opens_eagerly(self, bind_to_port: bool) -> bool {
        match self {
            ListenSocketKind::Stream => bind_to_port,
            ListenSocketKind::Datagram | ListenSocketKind::UnixDomain => true,
        }
    }

    /// Options that must be in place before `bind()`.
    fn apply_prebind(self, socket: &SocketImpl) -> Result<()> {
        match self {
            #[cfg(not(windows))]
            ListenSocketKind::Stream => socket
                .set_socket_option(libc::SOL_SOCKET, libc::SO_REUSEADDR, &1i32.to_ne_bytes())
                .map_err(|e| {
                    debug!(error = %e, "setting SO_REUSEADDR failed");
                    SocketError::ListenerOptions(OPTIONS_FAILED.to_string())
                }),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenSocketState {
    Unopened,
    Opened,
    Bound,
    Closed,
}

/// A socket that listens for connections or datagrams.
#[derive(Debug)]
pub struct ListenSocket {
    socket: SocketImpl,
    kind: ListenSocketKind,
    bind_to_port: bool,
    state: ListenSocketState,
}

impl ListenSocket {
    /// Build a listening socket for `address`.
    ///
    /// Stream sockets with `bind_to_port == false` get no OS handle; the
    /// address family is still checked and `options` are recorded for a later
    /// [`ListenSocket::open`]. Datagram sockets are always opened and bound
    /// only when `bind_to_port` is set. Pipe addresses are opened and bound
    /// unconditionally.
    ///
    /// # Panics
    ///
    /// Panics when a deferred stream socket is requested for an address family
    /// the OS does not support.
    pub fn network(
        iface: &dyn SocketInterface,
        socket_type: SocketType,
        address: Arc<Address>,
        options: &[Arc<dyn SocketOption>],
        bind_to_port: bool,
    ) -> Result<Self> {
        let kind = ListenSocketKind::for_address(&address, socket_type);
        if kind == ListenSocketKind::UnixDomain {
            return Self::uds_with(iface, address);
        }

        if !kind.opens_eagerly(bind_to_port) {
            if let Some(family) = address.ip_family() {
                assert!(
                    iface.ip_family_supported(family),
                    "Creating listen socket address {address} but the address family is not supported"
                );
            }
            let mut socket = SocketImpl::new(None, kind.socket_type(), address, None);
            socket.add_options(options);
            return Ok(Self {
                socket,
                kind,
                bind_to_port,
                state: ListenSocketState::Unopened,
            });
        }

        let handle = iface
            .socket(kind.socket_type(), &address)
            .map_err(|e| SocketError::open(&address, kind.socket_type(), e))?;
        let mut listen = Self {
            socket: SocketImpl::new(Some(handle), kind.socket_type(), Arc::clone(&address), None),
            kind,
            bind_to_port,
            state: ListenSocketState::Opened,
        };
        listen.setup_socket(options)?;
        if bind_to_port {
            listen.bind(address)?;
        }
        Ok(listen)
    }

    pub fn tcp(
        iface: &dyn SocketInterface,
        address: Arc<Address>,
        options: &[Arc<dyn SocketOption>],
        bind_to_port: bool,
    ) -> Result<Self> {
        Self::network(iface, SocketType::Stream, address, options, bind_to_port)
    }

    pub fn udp(
        iface: &dyn SocketInterface,
        address: Arc<Address>,
        options: &[Arc<dyn SocketOption>],
        bind_to_port: bool,
    ) -> Result<Self> {
        Self::network(iface, SocketType::Datagram, address, options, bind_to_port)
    }

    /// Open and bind a unix-domain listener at `address`.
    pub fn uds(iface: &dyn SocketInterface, address: Arc<Address>) -> Result<Self> {
        Self::uds_with(iface, address)
    }

    fn uds_with(iface: &dyn SocketInterface, address: Arc<Address>) -> Result<Self> {
        let kind = ListenSocketKind::UnixDomain;
        let handle = iface
            .socket(kind.socket_type(), &address)
            .map_err(|e| SocketError::open(&address, kind.socket_type(), e))?;
        let mut listen = Self {
            socket: SocketImpl::new(Some(handle), kind.socket_type(), Arc::clone(&address), None),
            kind,
            bind_to_port: true,
            state: ListenSocketState::Opened,
        };
        listen.bind(address)?;
        Ok(listen)
    }

    /// Adopt an already open unix-domain handle without binding it.
    pub fn uds_from_handle(handle: IoHandle, address: Arc<Address>) -> Self {
        Self {
            socket: SocketImpl::new(Some(handle), SocketType::Stream, address, None),
            kind: ListenSocketKind::UnixDomain,
            bind_to_port: true,
            state: ListenSocketState::Opened,
        }
    }

    /// Adopt an existing handle and apply `options` at the prebind stage.
    pub fn from_handle(
        kind: ListenSocketKind,
        handle: IoHandle,
        address: Arc<Address>,
        options: &[Arc<dyn SocketOption>],
    ) -> Result<Self> {
        let mut listen = Self {
            socket: SocketImpl::new(Some(handle), kind.socket_type(), address, None),
            kind,
            bind_to_port: true,
            state: ListenSocketState::Opened,
        };
        listen.setup_socket(options)?;
        Ok(listen)
    }

    fn setup_socket(&mut self, options: &[Arc<dyn SocketOption>]) -> Result<()> {
        self.kind.apply_prebind(&self.socket)?;
        apply_options(options, &self.socket, SocketOptionState::Prebind)
            .map_err(|_| SocketError::ListenerOptions(OPTIONS_FAILED.to_string()))?;
        self.socket.add_options(options);
        Ok(())
    }

    /// Open the OS handle of a deferred socket and apply the recorded prebind
    /// options. Does nothing if the socket already has a handle.
    ///
    /// If an option cannot be applied the new handle is closed and the socket
    /// ends up `Closed`.
    pub fn open(&mut self, iface: &dyn SocketInterface) -> Result<()> {
        if self.socket.is_open() {
            return Ok(());
        }
        let address = self.local_address();
        let handle = iface
            .socket(self.kind.socket_type(), &address)
            .map_err(|e| SocketError::open(&address, self.kind.socket_type(), e))?;
        self.socket.set_io_handle(handle);

        let options = self.socket.options().to_vec();
        let configured = self.kind.apply_prebind(&self.socket).and_then(|()| {
            apply_options(&options, &self.socket, SocketOptionState::Prebind)
                .map_err(|_| SocketError::ListenerOptions(OPTIONS_FAILED.to_string()))
        });
        match configured {
            Ok(()) => {
                self.state = ListenSocketState::Opened;
                Ok(())
            }
            Err(e) => {
                self.socket.close();
                self.state = ListenSocketState::Closed;
                Err(e)
            }
        }
    }

    /// Bind to `address`. On failure the handle is closed.
    pub fn bind(&mut self, address: Arc<Address>) -> Result<()> {
        match self.socket.bind(address) {
            Ok(()) => {
                self.state = ListenSocketState::Bound;
                trace!(addr = %self.local_address(), kind = ?self.kind, "listen socket bound");
                Ok(())
            }
            Err(e) => {
                self.state = ListenSocketState::Closed;
                Err(e)
            }
        }
    }

    /// Start listening and apply the options recorded for that stage.
    pub fn listen(&self, backlog: i32) -> Result<()> {
        let handle = self
            .socket
            .io_handle()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))?;
        handle.listen(backlog)?;
        apply_options(self.socket.options(), &self.socket, SocketOptionState::Listening)
            .map_err(|_| SocketError::ListenerOptions(OPTIONS_FAILED.to_string()))
    }

    /// Accept one pending connection as an accepted [`ConnectionSocket`].
    pub fn accept(&self, counter: &AcceptedSocketCounter) -> io::Result<ConnectionSocket> {
        let handle = self
            .socket
            .io_handle()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))?;
        let (accepted, peer) = handle.accept()?;
        Ok(ConnectionSocket::accepted(
            accepted,
            self.local_address(),
            Arc::new(peer),
            counter,
        ))
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Address)> {
        match self.socket.io_handle() {
            Some(handle) => handle.recv_from(buf),
            None => Err(io::Error::from_raw_os_error(libc::EBADF)),
        }
    }

    pub fn send_to(&self, buf: &[u8], to: &Address) -> io::Result<usize> {
        match self.socket.io_handle() {
            Some(handle) => handle.send_to(buf, to),
            None => Err(io::Error::from_raw_os_error(libc::EBADF)),
        }
    }

    /// A new socket of the same kind sharing the OS socket through a `dup`ed
    /// handle. Deferred sockets duplicate to another deferred socket.
    pub fn duplicate(&self) -> Result<Self> {
        let handle = self.socket.duplicate_handle()?;
        let state = if handle.is_some() {
            self.state
        } else {
            ListenSocketState::Unopened
        };
        let mut socket = SocketImpl::new(handle, self.kind.socket_type(), self.local_address(), None);
        socket.add_options(self.socket.options());
        Ok(Self {
            socket,
            kind: self.kind,
            bind_to_port: self.bind_to_port,
            state,
        })
    }

    pub fn kind(&self) -> ListenSocketKind {
        self.kind
    }

    pub fn bind_to_port(&self) -> bool {
        self.bind_to_port
    }

    pub fn state(&self) -> ListenSocketState {
        self.state
    }
}

impl Socket for ListenSocket {
    fn socket_impl(&self) -> &SocketImpl {
        &self.socket
    }

    fn socket_impl_mut(&mut self) -> &mut SocketImpl {
        &mut self.socket
    }

    fn close(&mut self) {
        self.socket.close();
        self.state = ListenSocketState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket_interface::SystemSocketInterface;

    fn loopback() -> Arc<Address> {
        Arc::new("127.0.0.1:0".parse().unwrap())
    }

    #[test]
    fn test_kind_policy() {
        assert!(ListenSocketKind::Stream.opens_eagerly(true));
        assert!(!ListenSocketKind::Stream.opens_eagerly(false));
        assert!(ListenSocketKind::Datagram.opens_eagerly(false));
        assert!(ListenSocketKind::UnixDomain.opens_eagerly(false));
        assert_eq!(ListenSocketKind::UnixDomain.socket_type(), SocketType::Stream);
        assert_eq!(ListenSocketKind::Datagram.socket_type(), SocketType::Datagram);
    }

    #[test]
    fn test_stream_prebind_sets_reuse_addr() {
        let socket = ListenSocket::tcp(&SystemSocketInterface, loopback(), &[], true).unwrap();
        assert_eq!(socket.state(), ListenSocketState::Bound);
        let value = socket
            .io_handle()
            .unwrap()
            .get_option_int(libc::SOL_SOCKET, libc::SO_REUSEADDR)
            .unwrap();
        assert_ne!(value, 0);
    }

    #[test]
    fn test_deferred_stream_opens_later() {
        let mut socket = ListenSocket::tcp(&SystemSocketInterface, loopback(), &[], false).unwrap();
        assert_eq!(socket.state(), ListenSocketState::Unopened);
        assert!(socket.io_handle().is_none());

        socket.open(&SystemSocketInterface).unwrap();
        assert_eq!(socket.state(), ListenSocketState::Opened);
        socket.bind(loopback()).unwrap();
        assert_eq!(socket.state(), ListenSocketState::Bound);
        assert_ne!(socket.local_address().port(), Some(0));
    }

    #[test]
    fn test_stream_listen_and_accept_counts() {
        let socket = ListenSocket::tcp(&SystemSocketInterface, loopback(), &[], true).unwrap();
        socket.listen(16).unwrap();

        let addr = socket.local_address().ip().unwrap();
        let _client = std::net::TcpStream::connect(addr).unwrap();

        let counter = AcceptedSocketCounter::default();
        let accepted = loop {
            match socket.accept(&counter) {
                Ok(conn) => break conn,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(5))
                }
                Err(e) => panic!("accept failed: {e}"),
            }
        };
        assert_eq!(counter.count(), 1);
        assert!(accepted.is_accepted());
        drop(accepted);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_close_moves_to_closed() {
        let mut socket = ListenSocket::udp(&SystemSocketInterface, loopback(), &[], true).unwrap();
        socket.close();
        assert_eq!(socket.state(), ListenSocketState::Closed);
        assert!(!socket.is_open());
    }
}
