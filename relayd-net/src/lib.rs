//! relayd-net: listening and connection sockets for relayd workers.
//!
//! # Layers
//!
//! - [`IoHandle`]: one owned OS socket, closed exactly once
//! - [`SocketImpl`]: handle plus local/remote address and retained options
//! - [`ListenSocket`]: stream, datagram and unix-domain listeners sharing one
//!   lifecycle, with the prebind policy selected by [`ListenSocketKind`]
//! - [`ConnectionSocket`]: accepted and client connections carrying the
//!   negotiated transport protocol, ALPN list and SNI
//!
//! Raw OS sockets are only ever opened through a [`SocketInterface`], which
//! keeps address-family probing and handle creation replaceable in tests.

pub mod address;
pub mod connection_socket;
pub mod error;
pub mod io_handle;
pub mod listen_socket;
pub mod options;
pub mod socket;
pub mod socket_interface;

pub use address::{Address, IpFamily};
pub use connection_socket::{AcceptedSocketCounter, ConnectionSocket};
pub use error::{Result, SocketError};
pub use io_handle::IoHandle;
pub use listen_socket::{ListenSocket, ListenSocketKind, ListenSocketState};
pub use options::{
    apply_options, LiteralSocketOption, SocketOption, SocketOptionImpl, SocketOptionState,
    SocketOptions,
};
pub use socket::{AddressProvider, Socket, SocketImpl, SocketType};
pub use socket_interface::{io_handle_for_addr, SocketInterface, SystemSocketInterface};
