//! Socket construction errors.

use crate::address::Address;
use crate::socket::SocketType;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SocketError>;

/// Errors raised while building listening or connection sockets.
///
/// None of these are retried inside this crate; the listener-setup caller
/// decides whether to try another port or abort startup.
#[derive(Debug, Error)]
pub enum SocketError {
    /// The OS rejected `bind()`. The handle is already closed.
    #[error("cannot bind '{address}': {details}")]
    Bind {
        address: String,
        errno: i32,
        details: String,
    },

    /// At least one socket option failed to apply. Options applied before the
    /// failing one stay applied.
    #[error("{0}")]
    ListenerOptions(String),

    /// No OS handle could be created for the address.
    #[error("cannot open {socket_type:?} socket for '{address}': {source}")]
    Open {
        address: String,
        socket_type: SocketType,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SocketError {
    pub(crate) fn bind(address: &Address, error: io::Error) -> Self {
        SocketError::Bind {
            address: address.as_string(),
            errno: error.raw_os_error().unwrap_or(0),
            details: error.to_string(),
        }
    }

    pub(crate) fn open(address: &Address, socket_type: SocketType, source: io::Error) -> Self {
        SocketError::Open {
            address: address.as_string(),
            socket_type,
            source,
        }
    }

    /// OS error code carried by the error, if any.
    pub fn errno(&self) -> Option<i32> {
        match self {
            SocketError::Bind { errno, .. } => Some(*errno),
            SocketError::Open { source, .. } => source.raw_os_error(),
            SocketError::Io(e) => e.raw_os_error(),
            SocketError::ListenerOptions(_) => None,
        }
    }

    /// Whether the failure was `EADDRINUSE`, the usual reason callers retry
    /// with a different port.
    pub fn is_address_in_use(&self) -> bool {
        self.errno() == Some(libc::EADDRINUSE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_message_names_address() {
        let address: Address = "127.0.0.1:80".parse().unwrap();
        let err = SocketError::bind(&address, io::Error::from_raw_os_error(libc::EADDRINUSE));
        assert!(err.to_string().starts_with("cannot bind '127.0.0.1:80': "));
        assert!(err.is_address_in_use());
        assert_eq!(err.errno(), Some(libc::EADDRINUSE));
    }

    #[test]
    fn test_options_error_has_no_errno() {
        let err = SocketError::ListenerOptions("ListenSocket: Setting socket options failed".into());
        assert_eq!(err.errno(), None);
        assert!(!err.is_address_in_use());
    }
}
