//! Listener setup: socket options per listener and the factory that hands
//! every worker its listen socket.

pub mod options;
pub mod socket_factory;

#[cfg(test)]
mod tests;

pub use options::build_listen_socket_options;
pub use socket_factory::ListenSocketFactory;
