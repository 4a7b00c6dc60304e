//! Connection close codes and packet parsing errors.

use std::fmt;
use thiserror::Error;

/// Reason a QUIC connection was closed.
///
/// Discriminants are dense so a code can index a fixed-size table of
/// [`QuicErrorCode::COUNT`] entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum QuicErrorCode {
    NoError = 0,
    InternalError,
    ConnectionRefused,
    FlowControlError,
    StreamLimitError,
    StreamStateError,
    FinalSizeError,
    FrameEncodingError,
    TransportParameterError,
    ConnectionIdLimitError,
    ProtocolViolation,
    InvalidToken,
    ApplicationError,
    CryptoBufferExceeded,
    KeyUpdateError,
    AeadLimitReached,
    NoViablePath,
    NetworkIdleTimeout,
    HandshakeTimeout,
    StatelessReset,
    PeerGoingAway,
    PacketWriteError,
    HandshakeFailed,
    InvalidVersion,
}

impl QuicErrorCode {
    pub const LAST: QuicErrorCode = QuicErrorCode::InvalidVersion;

    /// Size of a table indexed by [`QuicErrorCode::index`].
    pub const COUNT: usize = QuicErrorCode::LAST as usize + 1;

    pub const ALL: [QuicErrorCode; QuicErrorCode::COUNT] = [
        QuicErrorCode::NoError,
        QuicErrorCode::InternalError,
        QuicErrorCode::ConnectionRefused,
        QuicErrorCode::FlowControlError,
        QuicErrorCode::StreamLimitError,
        QuicErrorCode::StreamStateError,
        QuicErrorCode::FinalSizeError,
        QuicErrorCode::FrameEncodingError,
        QuicErrorCode::TransportParameterError,
        QuicErrorCode::ConnectionIdLimitError,
        QuicErrorCode::ProtocolViolation,
        QuicErrorCode::InvalidToken,
        QuicErrorCode::ApplicationError,
        QuicErrorCode::CryptoBufferExceeded,
        QuicErrorCode::KeyUpdateError,
        QuicErrorCode::AeadLimitReached,
        QuicErrorCode::NoViablePath,
        QuicErrorCode::NetworkIdleTimeout,
        QuicErrorCode::HandshakeTimeout,
        QuicErrorCode::StatelessReset,
        QuicErrorCode::PeerGoingAway,
        QuicErrorCode::PacketWriteError,
        QuicErrorCode::HandshakeFailed,
        QuicErrorCode::InvalidVersion,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Symbolic name, used verbatim in stat names.
    pub fn name(self) -> &'static str {
        match self {
            QuicErrorCode::NoError => "QUIC_NO_ERROR",
            QuicErrorCode::InternalError => "QUIC_INTERNAL_ERROR",
            QuicErrorCode::ConnectionRefused => "QUIC_CONNECTION_REFUSED",
            QuicErrorCode::FlowControlError => "QUIC_FLOW_CONTROL_ERROR",
            QuicErrorCode::StreamLimitError => "QUIC_STREAM_LIMIT_ERROR",
            QuicErrorCode::StreamStateError => "QUIC_STREAM_STATE_ERROR",
            QuicErrorCode::FinalSizeError => "QUIC_FINAL_SIZE_ERROR",
            QuicErrorCode::FrameEncodingError => "QUIC_FRAME_ENCODING_ERROR",
            QuicErrorCode::TransportParameterError => "QUIC_TRANSPORT_PARAMETER_ERROR",
            QuicErrorCode::ConnectionIdLimitError => "QUIC_CONNECTION_ID_LIMIT_ERROR",
            QuicErrorCode::ProtocolViolation => "QUIC_PROTOCOL_VIOLATION",
            QuicErrorCode::InvalidToken => "QUIC_INVALID_TOKEN",
            QuicErrorCode::ApplicationError => "QUIC_APPLICATION_ERROR",
            QuicErrorCode::CryptoBufferExceeded => "QUIC_CRYPTO_BUFFER_EXCEEDED",
            QuicErrorCode::KeyUpdateError => "QUIC_KEY_UPDATE_ERROR",
            QuicErrorCode::AeadLimitReached => "QUIC_AEAD_LIMIT_REACHED",
            QuicErrorCode::NoViablePath => "QUIC_NO_VIABLE_PATH",
            QuicErrorCode::NetworkIdleTimeout => "QUIC_NETWORK_IDLE_TIMEOUT",
            QuicErrorCode::HandshakeTimeout => "QUIC_HANDSHAKE_TIMEOUT",
            QuicErrorCode::StatelessReset => "QUIC_PUBLIC_RESET",
            QuicErrorCode::PeerGoingAway => "QUIC_PEER_GOING_AWAY",
            QuicErrorCode::PacketWriteError => "QUIC_PACKET_WRITE_ERROR",
            QuicErrorCode::HandshakeFailed => "QUIC_HANDSHAKE_FAILED",
            QuicErrorCode::InvalidVersion => "QUIC_INVALID_VERSION",
        }
    }
}

impl fmt::Display for QuicErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which endpoint initiated a connection close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionCloseSource {
    FromSelf,
    FromPeer,
}

/// Invariant-header parsing errors (RFC 8999).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("packet is empty")]
    Empty,

    #[error("packet truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("connection ID length {0} exceeds the maximum")]
    ConnectionIdTooLong(usize),
}
