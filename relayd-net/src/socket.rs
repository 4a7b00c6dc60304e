//! Socket base shared by listening and connection sockets.

use crate::address::Address;
use crate::error::{Result, SocketError};
use crate::io_handle::IoHandle;
use crate::options::SocketOption;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;

/// Transport-level socket type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketType {
    Stream,
    Datagram,
}

/// Local and remote addresses of a socket.
#[derive(Debug, Clone)]
pub struct AddressProvider {
    local_address: Arc<Address>,
    remote_address: Option<Arc<Address>>,
}

impl AddressProvider {
    pub fn new(local_address: Arc<Address>, remote_address: Option<Arc<Address>>) -> Self {
        Self {
            local_address,
            remote_address,
        }
    }

    pub fn local_address(&self) -> &Arc<Address> {
        &self.local_address
    }

    pub fn set_local_address(&mut self, address: Arc<Address>) {
        self.local_address = address;
    }

    pub fn remote_address(&self) -> Option<&Arc<Address>> {
        self.remote_address.as_ref()
    }
}

/// Capabilities common to every socket variant.
///
/// Variants embed a [`SocketImpl`] and expose it through `socket_impl`; the
/// remaining methods delegate to it.
pub trait Socket: Send {
    fn socket_impl(&self) -> &SocketImpl;

    fn socket_impl_mut(&mut self) -> &mut SocketImpl;

    fn socket_type(&self) -> SocketType {
        self.socket_impl().socket_type
    }

    fn local_address(&self) -> Arc<Address> {
        Arc::clone(self.socket_impl().address_provider.local_address())
    }

    fn remote_address(&self) -> Option<Arc<Address>> {
        self.socket_impl().address_provider.remote_address().cloned()
    }

    fn io_handle(&self) -> Option<&IoHandle> {
        self.socket_impl().io_handle.as_ref()
    }

    fn is_open(&self) -> bool {
        self.socket_impl().is_open()
    }

    fn close(&mut self) {
        self.socket_impl_mut().close()
    }

    fn set_socket_option(&self, level: libc::c_int, name: libc::c_int, value: &[u8]) -> io::Result<()> {
        self.socket_impl().set_socket_option(level, name, value)
    }

    /// Retain options so later stages (bound, listening) can apply them.
    fn add_options(&mut self, options: &[Arc<dyn SocketOption>]) {
        self.socket_impl_mut().add_options(options)
    }

    fn options(&self) -> &[Arc<dyn SocketOption>] {
        &self.socket_impl().options
    }
}

/// OS handle plus addressing and retained options.
///
/// The handle may be absent for sockets whose opening is deferred.
#[derive(Debug)]
pub struct SocketImpl {
    io_handle: Option<IoHandle>,
    address_provider: AddressProvider,
    socket_type: SocketType,
    options: Vec<Arc<dyn SocketOption>>,
}

impl SocketImpl {
    pub fn new(
        io_handle: Option<IoHandle>,
        socket_type: SocketType,
        local_address: Arc<Address>,
        remote_address: Option<Arc<Address>>,
    ) -> Self {
        Self {
            io_handle,
            address_provider: AddressProvider::new(local_address, remote_address),
            socket_type,
            options: Vec::new(),
        }
    }

    pub fn address_provider(&self) -> &AddressProvider {
        &self.address_provider
    }

    pub fn address_provider_mut(&mut self) -> &mut AddressProvider {
        &mut self.address_provider
    }

    pub fn is_open(&self) -> bool {
        self.io_handle.as_ref().is_some_and(IoHandle::is_open)
    }

    pub fn close(&mut self) {
        if let Some(handle) = self.io_handle.as_mut() {
            handle.close();
        }
    }

    pub(crate) fn set_io_handle(&mut self, io_handle: IoHandle) {
        self.io_handle = Some(io_handle);
    }

    /// Bind to `address`, which becomes the local address.
    ///
    /// On failure the handle is closed and must not be reused. On success an
    /// IP local address is refreshed from the kernel so a requested port 0
    /// turns into the port actually assigned.
    pub fn bind(&mut self, address: Arc<Address>) -> Result<()> {
        self.address_provider.set_local_address(Arc::clone(&address));

        let result = match self.io_handle.as_ref() {
            Some(handle) => handle.bind(&address),
            None => Err(io::Error::from_raw_os_error(libc::EBADF)),
        };
        if let Err(e) = result {
            self.close();
            return Err(SocketError::bind(&address, e));
        }

        if address.ip().is_some() {
            if let Some(resolved) = self.io_handle.as_ref().and_then(|h| h.local_address().ok()) {
                self.address_provider.set_local_address(Arc::new(resolved));
            }
        }
        Ok(())
    }

    pub fn set_socket_option(&self, level: libc::c_int, name: libc::c_int, value: &[u8]) -> io::Result<()> {
        match self.io_handle.as_ref() {
            Some(handle) => handle.set_option(level, name, value),
            None => Err(io::Error::from_raw_os_error(libc::EBADF)),
        }
    }

    pub fn add_options(&mut self, options: &[Arc<dyn SocketOption>]) {
        self.options.extend(options.iter().cloned());
    }

    /// Duplicate the OS handle, if there is one.
    pub fn duplicate_handle(&self) -> io::Result<Option<IoHandle>> {
        self.io_handle
            .as_ref()
            .filter(|h| h.is_open())
            .map(IoHandle::duplicate)
            .transpose()
    }
}

impl Socket for SocketImpl {
    fn socket_impl(&self) -> &SocketImpl {
        self
    }

    fn socket_impl_mut(&mut self) -> &mut SocketImpl {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket_interface::io_handle_for_addr;

    fn udp(address: &str) -> SocketImpl {
        let address: Arc<Address> = Arc::new(address.parse().unwrap());
        let handle = io_handle_for_addr(SocketType::Datagram, &address).unwrap();
        SocketImpl::new(Some(handle), SocketType::Datagram, address, None)
    }

    #[test]
    fn test_bind_resolves_ephemeral_port() {
        let mut socket = udp("127.0.0.1:0");
        let requested = socket.local_address();
        socket.bind(requested).unwrap();
        assert_ne!(socket.local_address().port(), Some(0));
        assert!(socket.is_open());
    }

    #[test]
    fn test_bind_failure_closes_handle() {
        let mut first = udp("127.0.0.1:0");
        first.bind(first.local_address()).unwrap();
        let taken = first.local_address();

        let mut second = udp("127.0.0.1:0");
        let err = second.bind(Arc::clone(&taken)).unwrap_err();
        assert!(matches!(err, SocketError::Bind { .. }));
        assert!(err.is_address_in_use());
        assert!(!second.is_open());
        assert_eq!(second.local_address(), taken);
    }

    #[test]
    fn test_deferred_socket_rejects_options() {
        let socket = SocketImpl::new(
            None,
            SocketType::Stream,
            Arc::new("127.0.0.1:0".parse().unwrap()),
            None,
        );
        assert!(!socket.is_open());
        let err = socket
            .set_socket_option(libc::SOL_SOCKET, libc::SO_REUSEADDR, &1i32.to_ne_bytes())
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
        assert!(socket.duplicate_handle().unwrap().is_none());
    }
}
