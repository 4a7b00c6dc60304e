//! Hands every worker the listen socket it serves a listener on.
//!
//! Without `reuse_port` all workers share one OS socket through duplicated
//! handles. With `reuse_port` each worker gets a socket of its own, and the
//! kernel spreads connections and datagrams between them.

use crate::config::ListenerConfig;
use crate::listener::options::build_listen_socket_options;
use parking_lot::Mutex;
use relayd_net::{
    apply_options, Address, ListenSocket, ListenSocketState, Result, Socket, SocketError,
    SocketInterface, SocketOptionState, SocketOptions, SocketType,
};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ListenSocketFactory {
    iface: Arc<dyn SocketInterface>,
    local_address: Arc<Address>,
    socket_type: SocketType,
    options: SocketOptions,
    bind_to_port: bool,
    listener_name: String,
    reuse_port: bool,
    /// Shared socket without `reuse_port`; with it, the socket that reserved
    /// the port until the first worker takes it.
    socket: Mutex<Option<ListenSocket>>,
}

impl ListenSocketFactory {
    /// Create the factory and, when needed, the socket created up front.
    ///
    /// A socket is created here when it is shared (no `reuse_port`, or a
    /// unix-domain address) and when the port is 0, so the kernel-assigned
    /// port is known before any worker starts and every worker binds to it.
    pub fn new(
        iface: Arc<dyn SocketInterface>,
        address: Arc<Address>,
        socket_type: SocketType,
        options: SocketOptions,
        bind_to_port: bool,
        listener_name: impl Into<String>,
        reuse_port: bool,
    ) -> Result<Self> {
        let reuse_port = reuse_port && !address.is_pipe();
        let mut factory = Self {
            iface,
            local_address: address,
            socket_type,
            options,
            bind_to_port,
            listener_name: listener_name.into(),
            reuse_port,
            socket: Mutex::new(None),
        };

        let create_socket = match factory.local_address.port() {
            Some(port) => !factory.reuse_port || port == 0,
            None => true,
        };

        if create_socket {
            let socket = factory.create_listen_socket_and_apply_options()?;
            if factory.local_address.port() == Some(0) {
                factory.local_address = socket.local_address();
            }
            *factory.socket.get_mut() = Some(socket);
        }

        debug!(
            listener = %factory.listener_name,
            addr = %factory.local_address,
            "Set listener socket factory local address"
        );
        Ok(factory)
    }

    /// Factory for a configured listener, using the listener's options.
    pub fn from_config(iface: Arc<dyn SocketInterface>, config: &ListenerConfig) -> Result<Self> {
        Self::new(
            iface,
            Arc::new(config.address.clone()),
            config.socket_type,
            build_listen_socket_options(config),
            config.bind_to_port,
            config.name.clone(),
            config.reuse_port,
        )
    }

    fn create_listen_socket_and_apply_options(&self) -> Result<ListenSocket> {
        let socket = ListenSocket::network(
            self.iface.as_ref(),
            self.socket_type,
            Arc::clone(&self.local_address),
            &self.options,
            self.bind_to_port,
        )?;

        debug!(
            listener = %self.listener_name,
            addr = %self.local_address,
            "Create listen socket"
        );

        // Bound-stage options need a bound handle. Sockets that were not bound
        // keep the options recorded for when they are.
        if socket.state() == ListenSocketState::Bound && !self.options.is_empty() {
            if apply_options(&self.options, &socket, SocketOptionState::Bound).is_err() {
                let message = format!("{}: Setting socket options failed", self.listener_name);
                warn!("{}", message);
                return Err(SocketError::ListenerOptions(message));
            }
            debug!("{}: Setting socket options succeeded", self.listener_name);
        }

        Ok(socket)
    }

    /// Listen socket for one worker.
    ///
    /// Without `reuse_port` every call returns a duplicate of the shared
    /// socket, so no two workers own the same handle. With `reuse_port` the
    /// first call takes over the socket that reserved the port, if any, and
    /// every later call creates a new socket bound to the same address.
    pub fn get_listen_socket(&self) -> Result<ListenSocket> {
        if !self.reuse_port {
            if let Some(socket) = self.socket.lock().as_ref() {
                return socket.duplicate();
            }
        } else if let Some(socket) = self.socket.lock().take() {
            return Ok(socket);
        }

        self.create_listen_socket_and_apply_options()
    }

    /// Resolved local address. For port 0 this is the kernel-assigned port.
    pub fn local_address(&self) -> &Arc<Address> {
        &self.local_address
    }

    pub fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    pub fn listener_name(&self) -> &str {
        &self.listener_name
    }

    pub fn reuse_port(&self) -> bool {
        self.reuse_port
    }

    pub fn bind_to_port(&self) -> bool {
        self.bind_to_port
    }

    /// Whether the factory still holds a socket.
    pub fn has_reserved_socket(&self) -> bool {
        self.socket.lock().is_some()
    }
}

impl fmt::Debug for ListenSocketFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenSocketFactory")
            .field("listener_name", &self.listener_name)
            .field("local_address", &self.local_address)
            .field("socket_type", &self.socket_type)
            .field("reuse_port", &self.reuse_port)
            .field("bind_to_port", &self.bind_to_port)
            .field("options", &self.options.len())
            .finish()
    }
}
