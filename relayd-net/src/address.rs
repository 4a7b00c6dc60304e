//! Local and remote endpoint addresses.

use serde::{Deserialize, Serialize};
use socket2::SockAddr;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Prefix used to spell unix-domain addresses in configuration.
pub const PIPE_PREFIX: &str = "unix:";

/// Shown for unix-domain peers that never bound a path.
const UNNAMED_PIPE: &str = "(unnamed)";

/// IP address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

/// An endpoint a socket can be bound or connected to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Address {
    /// IPv4 or IPv6 address and port.
    Ip(SocketAddr),
    /// Unix-domain socket path.
    Pipe(PathBuf),
}

impl Address {
    pub fn ip(&self) -> Option<SocketAddr> {
        match self {
            Address::Ip(addr) => Some(*addr),
            Address::Pipe(_) => None,
        }
    }

    pub fn ip_family(&self) -> Option<IpFamily> {
        match self {
            Address::Ip(SocketAddr::V4(_)) => Some(IpFamily::V4),
            Address::Ip(SocketAddr::V6(_)) => Some(IpFamily::V6),
            Address::Pipe(_) => None,
        }
    }

    pub fn port(&self) -> Option<u16> {
        self.ip().map(|addr| addr.port())
    }

    pub fn pipe_path(&self) -> Option<&Path> {
        match self {
            Address::Pipe(path) => Some(path),
            Address::Ip(_) => None,
        }
    }

    pub fn is_pipe(&self) -> bool {
        matches!(self, Address::Pipe(_))
    }

    /// Human-readable rendering used in logs and error messages.
    pub fn as_string(&self) -> String {
        self.to_string()
    }

    /// The unspecified address of the same family, used as the local address
    /// of sockets that have not been bound or connected yet.
    pub fn unspecified_like(&self) -> Address {
        match self {
            Address::Ip(SocketAddr::V4(_)) => {
                Address::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
            }
            Address::Ip(SocketAddr::V6(_)) => {
                Address::Ip(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0))
            }
            Address::Pipe(_) => Address::Pipe(PathBuf::new()),
        }
    }

    pub(crate) fn to_sock_addr(&self) -> io::Result<SockAddr> {
        match self {
            Address::Ip(addr) => Ok(SockAddr::from(*addr)),
            Address::Pipe(path) => SockAddr::unix(path),
        }
    }

    pub(crate) fn from_sock_addr(addr: &SockAddr) -> Option<Address> {
        if let Some(ip) = addr.as_socket() {
            return Some(Address::Ip(ip));
        }
        addr.as_pathname()
            .map(|path| Address::Pipe(path.to_path_buf()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ip(addr) => write!(f, "{}", addr),
            Address::Pipe(path) if path.as_os_str().is_empty() => {
                write!(f, "{}{}", PIPE_PREFIX, UNNAMED_PIPE)
            }
            Address::Pipe(path) => write!(f, "{}", path.display()),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Ip(addr)
    }
}

impl FromStr for Address {
    type Err = String;

    /// Parses `ip:port`, `[ipv6]:port` or `unix:/path/to/socket`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix(PIPE_PREFIX) {
            if path.is_empty() {
                return Err("unix socket address has an empty path".to_string());
            }
            return Ok(Address::Pipe(PathBuf::from(path)));
        }
        s.parse::<SocketAddr>()
            .map(Address::Ip)
            .map_err(|e| format!("Invalid socket address '{}': {}", s, e))
    }
}

impl TryFrom<String> for Address {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        match address {
            Address::Ip(addr) => addr.to_string(),
            Address::Pipe(path) => format!("{}{}", PIPE_PREFIX, path.display()),
        }
    }
}
