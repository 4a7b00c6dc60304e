//! Socket options applied at well-defined points of a socket's life.
//!
//! Each option declares the [`SocketOptionState`] it belongs to. Applying a
//! list at a given state touches only the options of that state; anything
//! else is skipped as a successful no-op.

use crate::address::IpFamily;
use crate::socket::Socket;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared, ordered list of options.
pub type SocketOptions = Vec<Arc<dyn SocketOption>>;

#[cfg(target_os = "linux")]
mod linux {
    pub const IP_FREEBIND: libc::c_int = 15;
    pub const IPV6_FREEBIND: libc::c_int = 78;
    pub const IP_TRANSPARENT: libc::c_int = 19;
    pub const IPV6_TRANSPARENT: libc::c_int = 75;
    pub const IP_PKTINFO: libc::c_int = 8;
    pub const IPV6_RECVPKTINFO: libc::c_int = 49;
    pub const SO_RXQ_OVFL: libc::c_int = 40;
    pub const UDP_GRO: libc::c_int = 104;
}

/// Stage of a socket's life at which an option takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketOptionState {
    /// After the handle is opened, before `bind()`.
    Prebind,
    /// After `bind()`.
    Bound,
    /// After `listen()`.
    Listening,
}

pub trait SocketOption: fmt::Debug + Send + Sync {
    /// Apply the option if it belongs to `state`.
    fn set_option(&self, socket: &dyn Socket, state: SocketOptionState) -> io::Result<()>;
}

/// Level/name pair of a raw option together with a printable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptionName {
    pub level: libc::c_int,
    pub option: libc::c_int,
    pub name: &'static str,
}

impl SocketOptionName {
    pub const fn new(level: libc::c_int, option: libc::c_int, name: &'static str) -> Self {
        Self {
            level,
            option,
            name,
        }
    }
}

/// A raw `setsockopt` bound to one state.
///
/// `name` is `None` when the option does not exist on this platform; trying
/// to apply such an option fails.
#[derive(Debug, Clone)]
pub struct SocketOptionImpl {
    state: SocketOptionState,
    name: Option<SocketOptionName>,
    value: Vec<u8>,
}

impl SocketOptionImpl {
    pub fn new(state: SocketOptionState, name: Option<SocketOptionName>, value: Vec<u8>) -> Self {
        Self { state, name, value }
    }

    pub fn int(state: SocketOptionState, name: Option<SocketOptionName>, value: libc::c_int) -> Self {
        Self::new(state, name, value.to_ne_bytes().to_vec())
    }

    pub fn state(&self) -> SocketOptionState {
        self.state
    }

    pub fn is_supported(&self) -> bool {
        self.name.is_some()
    }
}

impl SocketOption for SocketOptionImpl {
    fn set_option(&self, socket: &dyn Socket, state: SocketOptionState) -> io::Result<()> {
        if state != self.state {
            return Ok(());
        }
        let Some(name) = self.name else {
            warn!(?state, "socket option not supported on this platform");
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "socket option not supported on this platform",
            ));
        };

        socket
            .set_socket_option(name.level, name.option, &self.value)
            .map_err(|e| {
                warn!(option = name.name, error = %e, "setting socket option failed");
                e
            })
    }
}

/// Picks the IPv4 or IPv6 flavour of an option from the socket's local
/// address. Non-IP sockets use the IPv4 flavour.
#[derive(Debug, Clone)]
pub struct AddrFamilyAwareSocketOption {
    ipv4: SocketOptionImpl,
    ipv6: SocketOptionImpl,
}

impl AddrFamilyAwareSocketOption {
    pub fn new(ipv4: SocketOptionImpl, ipv6: SocketOptionImpl) -> Self {
        Self { ipv4, ipv6 }
    }
}

impl SocketOption for AddrFamilyAwareSocketOption {
    fn set_option(&self, socket: &dyn Socket, state: SocketOptionState) -> io::Result<()> {
        match socket.local_address().ip_family() {
            Some(IpFamily::V6) => self.ipv6.set_option(socket, state),
            _ => self.ipv4.set_option(socket, state),
        }
    }
}

/// Apply every option at `state`, stopping at the first failure.
///
/// Options applied before the failure are not rolled back.
pub fn apply_options(
    options: &[Arc<dyn SocketOption>],
    socket: &dyn Socket,
    state: SocketOptionState,
) -> io::Result<()> {
    for option in options {
        if let Err(e) = option.set_option(socket, state) {
            debug!(?option, ?state, error = %e, "socket option application stopped");
            return Err(e);
        }
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn linux_name(level: libc::c_int, option: libc::c_int, name: &'static str) -> Option<SocketOptionName> {
    Some(SocketOptionName::new(level, option, name))
}

#[cfg(not(target_os = "linux"))]
fn linux_name(_level: libc::c_int, _option: libc::c_int, _name: &'static str) -> Option<SocketOptionName> {
    None
}

fn family_aware(
    state: SocketOptionState,
    ipv4: Option<SocketOptionName>,
    ipv6: Option<SocketOptionName>,
) -> Arc<dyn SocketOption> {
    Arc::new(AddrFamilyAwareSocketOption::new(
        SocketOptionImpl::int(state, ipv4, 1),
        SocketOptionImpl::int(state, ipv6, 1),
    ))
}

/// `SO_REUSEPORT` so every worker can bind its own socket to the port.
pub fn reuse_port_options() -> SocketOptions {
    #[cfg(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux",
        target_os = "macos",
        target_os = "netbsd",
        target_os = "openbsd",
    ))]
    let name = Some(SocketOptionName::new(
        libc::SOL_SOCKET,
        libc::SO_REUSEPORT,
        "SO_REUSEPORT",
    ));
    #[cfg(not(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux",
        target_os = "macos",
        target_os = "netbsd",
        target_os = "openbsd",
    )))]
    let name = None;

    vec![Arc::new(SocketOptionImpl::int(SocketOptionState::Prebind, name, 1))]
}

/// `IP_TRANSPARENT` before and after bind, for TPROXY-style listeners.
pub fn ip_transparent_options() -> SocketOptions {
    #[cfg(target_os = "linux")]
    let (v4, v6) = (
        linux_name(libc::IPPROTO_IP, linux::IP_TRANSPARENT, "IP_TRANSPARENT"),
        linux_name(libc::IPPROTO_IPV6, linux::IPV6_TRANSPARENT, "IPV6_TRANSPARENT"),
    );
    #[cfg(not(target_os = "linux"))]
    let (v4, v6) = (None, None);

    vec![
        family_aware(SocketOptionState::Prebind, v4, v6),
        family_aware(SocketOptionState::Bound, v4, v6),
    ]
}

/// `IP_FREEBIND` to bind addresses not yet configured on the host.
pub fn ip_freebind_options() -> SocketOptions {
    #[cfg(target_os = "linux")]
    let (v4, v6) = (
        linux_name(libc::IPPROTO_IP, linux::IP_FREEBIND, "IP_FREEBIND"),
        linux_name(libc::IPPROTO_IPV6, linux::IPV6_FREEBIND, "IPV6_FREEBIND"),
    );
    #[cfg(not(target_os = "linux"))]
    let (v4, v6) = (None, None);

    vec![family_aware(SocketOptionState::Prebind, v4, v6)]
}

/// Packet info so `recvmsg` reports the destination address of datagrams.
pub fn ip_packet_info_options() -> SocketOptions {
    #[cfg(target_os = "linux")]
    let (v4, v6) = (
        linux_name(libc::IPPROTO_IP, linux::IP_PKTINFO, "IP_PKTINFO"),
        linux_name(libc::IPPROTO_IPV6, linux::IPV6_RECVPKTINFO, "IPV6_RECVPKTINFO"),
    );
    #[cfg(not(target_os = "linux"))]
    let (v4, v6) = (None, None);

    vec![family_aware(SocketOptionState::Bound, v4, v6)]
}

/// `SO_RXQ_OVFL` so datagram drops caused by a full receive queue are reported.
pub fn rx_queue_overflow_options() -> SocketOptions {
    #[cfg(target_os = "linux")]
    let name = linux_name(libc::SOL_SOCKET, linux::SO_RXQ_OVFL, "SO_RXQ_OVFL");
    #[cfg(not(target_os = "linux"))]
    let name = None;

    vec![Arc::new(SocketOptionImpl::int(SocketOptionState::Prebind, name, 1))]
}

/// `UDP_GRO` receive offload.
pub fn udp_gro_options() -> SocketOptions {
    #[cfg(target_os = "linux")]
    let name = linux_name(libc::IPPROTO_UDP, linux::UDP_GRO, "UDP_GRO");
    #[cfg(not(target_os = "linux"))]
    let name = None;

    vec![Arc::new(SocketOptionImpl::int(SocketOptionState::Bound, name, 1))]
}

/// Whether the platform supports UDP GRO at all.
pub fn udp_gro_supported() -> bool {
    cfg!(target_os = "linux")
}

/// Operator-supplied raw option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiteralSocketOption {
    pub state: SocketOptionState,
    pub level: i32,
    pub name: i32,
    pub int_value: i32,
}

pub fn literal_options(literals: &[LiteralSocketOption]) -> SocketOptions {
    literals
        .iter()
        .map(|literal| {
            Arc::new(SocketOptionImpl::int(
                literal.state,
                Some(SocketOptionName::new(literal.level, literal.name, "literal")),
                literal.int_value,
            )) as Arc<dyn SocketOption>
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::socket::{SocketImpl, SocketType};
    use crate::socket_interface::io_handle_for_addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn udp_socket() -> SocketImpl {
        let address: Arc<Address> = Arc::new("127.0.0.1:0".parse().unwrap());
        let handle = io_handle_for_addr(SocketType::Datagram, &address).unwrap();
        SocketImpl::new(Some(handle), SocketType::Datagram, address, None)
    }

    /// Counts how often it was asked to apply at its own state.
    #[derive(Debug)]
    struct Recording {
        state: SocketOptionState,
        fail: bool,
        applied: AtomicUsize,
    }

    impl SocketOption for Recording {
        fn set_option(&self, _socket: &dyn Socket, state: SocketOptionState) -> io::Result<()> {
            if state != self.state {
                return Ok(());
            }
            self.applied.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(io::Error::new(io::ErrorKind::Other, "refused"))
            } else {
                Ok(())
            }
        }
    }

    fn recording(state: SocketOptionState, fail: bool) -> Arc<Recording> {
        Arc::new(Recording {
            state,
            fail,
            applied: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_options_for_other_states_are_skipped() {
        let socket = udp_socket();
        let prebind = recording(SocketOptionState::Prebind, false);
        let bound = recording(SocketOptionState::Bound, false);
        let options: SocketOptions = vec![prebind.clone(), bound.clone()];

        apply_options(&options, &socket, SocketOptionState::Prebind).unwrap();
        assert_eq!(prebind.applied.load(Ordering::SeqCst), 1);
        assert_eq!(bound.applied.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failure_stops_without_rollback() {
        let socket = udp_socket();
        let first = recording(SocketOptionState::Prebind, false);
        let failing = recording(SocketOptionState::Prebind, true);
        let never = recording(SocketOptionState::Prebind, false);
        let options: SocketOptions = vec![first.clone(), failing.clone(), never.clone()];

        assert!(apply_options(&options, &socket, SocketOptionState::Prebind).is_err());
        assert_eq!(first.applied.load(Ordering::SeqCst), 1);
        assert_eq!(failing.applied.load(Ordering::SeqCst), 1);
        assert_eq!(never.applied.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsupported_option_fails_only_at_its_state() {
        let socket = udp_socket();
        let option = SocketOptionImpl::int(SocketOptionState::Bound, None, 1);
        assert!(option.set_option(&socket, SocketOptionState::Prebind).is_ok());
        let err = option.set_option(&socket, SocketOptionState::Bound).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn test_reuse_port_applies_prebind() {
        let socket = udp_socket();
        apply_options(&reuse_port_options(), &socket, SocketOptionState::Prebind).unwrap();
        #[cfg(target_os = "linux")]
        {
            let value = socket
                .io_handle()
                .unwrap()
                .get_option_int(libc::SOL_SOCKET, libc::SO_REUSEPORT)
                .unwrap();
            assert_ne!(value, 0);
        }
    }

    #[test]
    fn test_literal_option_is_applied() {
        let socket = udp_socket();
        let literals = [LiteralSocketOption {
            state: SocketOptionState::Prebind,
            level: libc::SOL_SOCKET,
            name: libc::SO_BROADCAST,
            int_value: 1,
        }];
        apply_options(&literal_options(&literals), &socket, SocketOptionState::Prebind).unwrap();
        let value = socket
            .io_handle()
            .unwrap()
            .get_option_int(libc::SOL_SOCKET, libc::SO_BROADCAST)
            .unwrap();
        assert_ne!(value, 0);
    }
}
