//! relayd-quic: per-worker QUIC connection dispatch.
//!
//! Every worker owns one [`QuicDispatcher`] fed from its own UDP socket. New
//! connections are admitted through a [`CryptoStreamHelper`], and their server
//! connection IDs keep the [`ROUTING_PREFIX_LEN`]-byte prefix the kernel packet
//! filter routes on, so every later packet of a flow reaches the same worker.

pub mod cid;
pub mod context;
pub mod crypto_helper;
pub mod dispatcher;
pub mod error;
pub mod packet;
pub mod session;
pub mod stat_names;
pub mod version;

pub use cid::{ConnectionId, ConnectionIdReplacer, MAX_CID_LENGTH, ROUTING_PREFIX_LEN};
pub use context::{ConnectionCounter, ConnectionHandler, EventLoopHandle, ListenerContext};
pub use crypto_helper::{AdmissionDecision, CryptoServerStreamHelper, CryptoStreamHelper, ParsedClientHello};
pub use dispatcher::{
    DispatchStats, DispatcherConfig, DispatcherHooks, DropReason, PacketDisposition, QuicDispatcher,
    WorkerDispatcher,
};
pub use error::{ConnectionCloseSource, PacketError, QuicErrorCode};
pub use session::{QuicSession, ServerSession};
pub use stat_names::QuicStatNames;
pub use version::QuicVersion;
