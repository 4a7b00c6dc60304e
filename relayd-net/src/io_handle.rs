//! Owned OS socket handle.

use crate::address::Address;
use socket2::Socket as Socket2;
use std::fmt;
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

/// Exclusive owner of one OS socket.
///
/// The descriptor is closed exactly once: either by [`IoHandle::close`] or
/// when the handle is dropped. Every operation on a closed handle fails with
/// `EBADF`.
pub struct IoHandle {
    socket: Option<Socket2>,
}

impl IoHandle {
    pub fn new(socket: Socket2) -> Self {
        Self {
            socket: Some(socket),
        }
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub fn close(&mut self) {
        // Dropping the socket2 value closes the descriptor.
        self.socket.take();
    }

    pub fn fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(|s| s.as_raw_fd())
    }

    /// Borrow the underlying socket2 socket, e.g. for registration with an
    /// external packet filter.
    pub fn as_socket(&self) -> Option<&Socket2> {
        self.socket.as_ref()
    }

    fn socket(&self) -> io::Result<&Socket2> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }

    pub fn bind(&self, address: &Address) -> io::Result<()> {
        self.socket()?.bind(&address.to_sock_addr()?)
    }

    pub fn listen(&self, backlog: i32) -> io::Result<()> {
        self.socket()?.listen(backlog)
    }

    pub fn connect(&self, address: &Address) -> io::Result<()> {
        self.socket()?.connect(&address.to_sock_addr()?)
    }

    /// Accept one pending connection. The accepted handle is non-blocking.
    pub fn accept(&self) -> io::Result<(IoHandle, Address)> {
        let (socket, peer) = self.socket()?.accept()?;
        socket.set_nonblocking(true)?;
        // Unix-domain peers usually have no bound path.
        let peer = Address::from_sock_addr(&peer).unwrap_or_else(|| Address::Pipe(Default::default()));
        Ok((IoHandle::new(socket), peer))
    }

    /// Address the OS actually bound the socket to.
    pub fn local_address(&self) -> io::Result<Address> {
        let addr = self.socket()?.local_addr()?;
        Address::from_sock_addr(&addr).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "unsupported local address family")
        })
    }

    /// `dup(2)` the descriptor. The copy refers to the same open socket but
    /// is an independent handle with its own lifetime.
    pub fn duplicate(&self) -> io::Result<IoHandle> {
        Ok(IoHandle::new(self.socket()?.try_clone()?))
    }

    pub fn set_option(&self, level: libc::c_int, name: libc::c_int, value: &[u8]) -> io::Result<()> {
        let fd = self.socket()?.as_raw_fd();
        let ret = unsafe {
            libc::setsockopt(
                fd,
                level,
                name,
                value.as_ptr() as *const libc::c_void,
                value.len() as libc::socklen_t,
            )
        };
        if ret == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub fn get_option_int(&self, level: libc::c_int, name: libc::c_int) -> io::Result<libc::c_int> {
        let fd = self.socket()?.as_raw_fd();
        let mut value: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                fd,
                level,
                name,
                &mut value as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if ret == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(value)
        }
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Address)> {
        // SAFETY: socket2 only writes initialized bytes into the buffer and
        // `u8` has no invalid bit patterns.
        let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
        let (len, from) = self.socket()?.recv_from(uninit)?;
        let from = Address::from_sock_addr(&from).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "datagram from unsupported address family")
        })?;
        Ok((len, from))
    }

    /// Read from a connected socket. `Ok(0)` means the peer closed its side.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: as in `recv_from`.
        let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
        self.socket()?.recv(uninit)
    }

    pub fn send_to(&self, buf: &[u8], to: &Address) -> io::Result<usize> {
        self.socket()?.send_to(buf, &to.to_sock_addr()?)
    }

    /// Smoothed RTT reported by the kernel for TCP sockets.
    ///
    /// `None` when the socket is closed, is not a TCP socket, or the platform
    /// has no `TCP_INFO`.
    #[cfg(target_os = "linux")]
    pub fn last_round_trip_time(&self) -> Option<Duration> {
        let fd = self.socket.as_ref()?.as_raw_fd();
        let mut info: libc::tcp_info = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::tcp_info>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                fd,
                libc::IPPROTO_TCP,
                libc::TCP_INFO,
                &mut info as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if ret == -1 {
            return None;
        }
        Some(Duration::from_micros(info.tcpi_rtt as u64))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn last_round_trip_time(&self) -> Option<Duration> {
        None
    }
}

impl fmt::Debug for IoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoHandle").field("fd", &self.fd()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use socket2::{Domain, Protocol, Type};

    fn udp_handle() -> IoHandle {
        IoHandle::new(Socket2::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap())
    }

    #[test]
    fn test_closed_handle_reports_ebadf() {
        let mut handle = udp_handle();
        assert!(handle.is_open());
        handle.close();
        assert!(!handle.is_open());
        assert_eq!(handle.fd(), None);

        let err = handle.local_address().unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));

        // Closing twice is harmless.
        handle.close();
    }

    #[test]
    fn test_duplicate_has_distinct_fd() {
        let handle = udp_handle();
        let dup = handle.duplicate().unwrap();
        assert_ne!(handle.fd(), dup.fd());
    }

    #[test]
    fn test_udp_socket_has_no_round_trip_time() {
        let handle = udp_handle();
        assert_eq!(handle.last_round_trip_time(), None);
    }

    #[test]
    fn test_set_and_get_int_option() {
        let handle = udp_handle();
        handle
            .set_option(libc::SOL_SOCKET, libc::SO_REUSEADDR, &1i32.to_ne_bytes())
            .unwrap();
        let value = handle
            .get_option_int(libc::SOL_SOCKET, libc::SO_REUSEADDR)
            .unwrap();
        assert_ne!(value, 0);
    }
}
