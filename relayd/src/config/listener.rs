//! Per-listener configuration.
//!
//! Each `[[listeners]]` table describes one address the daemon listens on.
//! Every worker gets its own socket for every listener, either a duplicate of
//! one shared socket or, with `reuse_port`, a socket of its own.
//!
//! ```toml
//! [[listeners]]
//! name = "quic_ingress"
//! address = "0.0.0.0:443"
//! socket_type = "datagram"
//! reuse_port = true
//!
//! [listeners.quic]
//! idle_timeout_secs = 30
//!
//! [[listeners.socket_options]]
//! state = "prebind"
//! level = 1      # SOL_SOCKET
//! name = 8       # SO_RCVBUF
//! int_value = 4194304
//! ```

use relayd_net::{Address, LiteralSocketOption, SocketType};
use relayd_quic::{MAX_CID_LENGTH, ROUTING_PREFIX_LEN};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use super::validation::ConfigValidator;

/// One listening address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Unique listener name, used in logs and as the stats scope
    /// `listener.<name>`.
    pub name: String,

    /// `ip:port`, `[ipv6]:port` or `unix:/path`.
    pub address: Address,

    /// `"stream"` (TCP) or `"datagram"` (UDP carrying QUIC).
    pub socket_type: SocketType,

    /// Bind the socket. Unbound stream listeners only exist to receive
    /// connections redirected from other listeners.
    ///
    /// **Default:** `true`
    pub bind_to_port: bool,

    /// Give every worker its own `SO_REUSEPORT` socket instead of sharing one.
    /// Required for datagram listeners when more than one worker runs.
    ///
    /// **Default:** `true`
    pub reuse_port: bool,

    /// Set `IP_TRANSPARENT` for TPROXY setups.
    pub transparent: bool,

    /// Set `IP_FREEBIND` to bind addresses not configured on the host.
    pub freebind: bool,

    /// `listen()` backlog of stream listeners.
    ///
    /// **Default:** 128
    pub backlog: i32,

    /// Raw options applied at the given stage.
    pub socket_options: Vec<LiteralSocketOption>,

    /// QUIC settings of datagram listeners.
    pub quic: QuicListenerConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            name: "quic_ingress".to_string(),
            address: Address::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 443)),
            socket_type: SocketType::Datagram,
            bind_to_port: true,
            reuse_port: true,
            transparent: false,
            freebind: false,
            backlog: 128,
            socket_options: Vec::new(),
            quic: QuicListenerConfig::default(),
        }
    }
}

impl ListenerConfig {
    /// Stats scope name of this listener.
    pub fn stat_prefix(&self) -> String {
        format!("listener.{}", self.name)
    }

    pub fn is_quic(&self) -> bool {
        self.socket_type == SocketType::Datagram
    }
}

impl ConfigValidator for ListenerConfig {
    fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.is_empty() {
            errors.push("listener name must not be empty".to_string());
        }
        if self.name.contains('.') {
            errors.push("listener name must not contain '.'".to_string());
        }

        if self.address.is_pipe() {
            if self.socket_type == SocketType::Datagram {
                errors.push("unix domain listeners must use socket_type = \"stream\"".to_string());
            }
            if self.transparent || self.freebind {
                errors.push("transparent and freebind only apply to IP listeners".to_string());
            }
        }

        if self.backlog <= 0 {
            errors.push("backlog must be > 0".to_string());
        }

        if self.is_quic() {
            if let Err(e) = self.quic.validate() {
                errors.extend(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// QUIC dispatch settings of a datagram listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuicListenerConfig {
    /// Sessions without packets for this long are closed.
    ///
    /// **Default:** 30
    pub idle_timeout_secs: u64,

    /// Length of the server connection IDs this listener hands out. Longer or
    /// shorter client-chosen IDs are replaced, keeping the routing prefix.
    ///
    /// **Default:** 8
    pub expected_connection_id_length: usize,
}

impl Default for QuicListenerConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30,
            expected_connection_id_length: 8,
        }
    }
}

impl QuicListenerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.idle_timeout_secs == 0 {
            errors.push("quic.idle_timeout_secs must be > 0".to_string());
        }

        if !(ROUTING_PREFIX_LEN..=MAX_CID_LENGTH).contains(&self.expected_connection_id_length) {
            errors.push(format!(
                "quic.expected_connection_id_length must be between {} and {}",
                ROUTING_PREFIX_LEN, MAX_CID_LENGTH
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
