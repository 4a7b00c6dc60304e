//! Creation of raw OS sockets.
//!
//! Everything that opens an OS socket goes through [`SocketInterface`], so
//! tests can stand in for the kernel when probing address-family support.

use crate::address::{Address, IpFamily};
use crate::io_handle::IoHandle;
use crate::socket::SocketType;
use socket2::{Domain, Protocol, Socket as Socket2, Type};
use std::io;
use std::net::SocketAddr;

pub trait SocketInterface: Send + Sync {
    /// Open a non-blocking socket suitable for `address`.
    fn socket(&self, socket_type: SocketType, address: &Address) -> io::Result<IoHandle>;

    /// Whether the OS can create sockets of this IP family.
    fn ip_family_supported(&self, family: IpFamily) -> bool;
}

/// Socket interface backed by the host kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSocketInterface;

impl SocketInterface for SystemSocketInterface {
    fn socket(&self, socket_type: SocketType, address: &Address) -> io::Result<IoHandle> {
        let domain = match address {
            Address::Ip(SocketAddr::V4(_)) => Domain::IPV4,
            Address::Ip(SocketAddr::V6(_)) => Domain::IPV6,
            Address::Pipe(_) => Domain::UNIX,
        };
        let (ty, protocol) = match (socket_type, address.is_pipe()) {
            (SocketType::Stream, false) => (Type::STREAM, Some(Protocol::TCP)),
            (SocketType::Datagram, false) => (Type::DGRAM, Some(Protocol::UDP)),
            (SocketType::Stream, true) => (Type::STREAM, None),
            (SocketType::Datagram, true) => (Type::DGRAM, None),
        };

        let socket = Socket2::new(domain, ty, protocol)?;
        socket.set_nonblocking(true)?;

        // Wildcard IPv6 listeners accept IPv4-mapped traffic as well.
        if let Address::Ip(SocketAddr::V6(addr)) = address {
            socket.set_only_v6(!addr.ip().is_unspecified())?;
        }

        Ok(IoHandle::new(socket))
    }

    fn ip_family_supported(&self, family: IpFamily) -> bool {
        let domain = match family {
            IpFamily::V4 => Domain::IPV4,
            IpFamily::V6 => Domain::IPV6,
        };
        Socket2::new(domain, Type::STREAM, None).is_ok()
    }
}

/// Open an OS handle for `address` through the system socket interface.
pub fn io_handle_for_addr(socket_type: SocketType, address: &Address) -> io::Result<IoHandle> {
    SystemSocketInterface.socket(socket_type, address)
}
