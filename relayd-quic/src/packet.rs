//! Version-independent QUIC header parsing (RFC 8999).
//!
//! Only the fields needed to route a datagram are read: header form,
//! version, connection IDs and, for known versions, the long packet type.
//! Nothing past the connection IDs is inspected.

use crate::cid::{ConnectionId, MAX_CID_LENGTH};
use crate::error::PacketError;
use crate::version::{QuicVersion, VERSION_NEGOTIATION};

/// Header form bit: 1 for long headers.
pub const HEADER_FORM_BIT: u8 = 0x80;

/// Long packet type bits.
pub const LONG_PACKET_TYPE_MASK: u8 = 0x30;

/// Client Initial packets must be padded to at least this size.
pub const MIN_INITIAL_PACKET_SIZE: usize = 1200;

/// Minimum destination connection ID length of a client Initial.
pub const MIN_CLIENT_INITIAL_DCID_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongPacketType {
    Initial,
    ZeroRtt,
    Handshake,
    Retry,
}

impl LongPacketType {
    fn from_bits(bits: u8, version: QuicVersion) -> Self {
        // Type codes are rotated so that the version's Initial code is zero.
        let normalized = bits.wrapping_sub(version.initial_type_bits()) & 0b11;
        match normalized {
            0b00 => LongPacketType::Initial,
            0b01 => LongPacketType::ZeroRtt,
            0b10 => LongPacketType::Handshake,
            _ => LongPacketType::Retry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketHeader {
    Long {
        /// Raw version field.
        version: u32,
        /// `None` for Version Negotiation packets and unknown versions.
        packet_type: Option<LongPacketType>,
        dcid: ConnectionId,
        scid: ConnectionId,
    },
    Short {
        dcid: ConnectionId,
    },
}

impl PacketHeader {
    pub fn dcid(&self) -> &ConnectionId {
        match self {
            PacketHeader::Long { dcid, .. } | PacketHeader::Short { dcid } => dcid,
        }
    }

    pub fn is_long(&self) -> bool {
        matches!(self, PacketHeader::Long { .. })
    }

    pub fn quic_version(&self) -> Option<QuicVersion> {
        match self {
            PacketHeader::Long { version, .. } => QuicVersion::from_wire(*version),
            PacketHeader::Short { .. } => None,
        }
    }

    pub fn is_initial(&self) -> bool {
        matches!(
            self,
            PacketHeader::Long {
                packet_type: Some(LongPacketType::Initial),
                ..
            }
        )
    }
}

fn take<'a>(packet: &'a [u8], offset: usize, len: usize) -> Result<&'a [u8], PacketError> {
    let end = offset + len;
    packet.get(offset..end).ok_or(PacketError::Truncated {
        needed: end,
        available: packet.len(),
    })
}

fn read_cid(packet: &[u8], offset: &mut usize) -> Result<ConnectionId, PacketError> {
    let len = take(packet, *offset, 1)?[0] as usize;
    *offset += 1;
    if len > MAX_CID_LENGTH {
        return Err(PacketError::ConnectionIdTooLong(len));
    }
    let bytes = take(packet, *offset, len)?;
    *offset += len;
    ConnectionId::from_slice(bytes).ok_or(PacketError::ConnectionIdTooLong(len))
}

/// Parse the invariant header of `packet`.
///
/// Short headers carry no length, so their destination connection ID is
/// taken to be `short_dcid_len` bytes, the length this server issues.
pub fn parse_header(packet: &[u8], short_dcid_len: usize) -> Result<PacketHeader, PacketError> {
    let first = *packet.first().ok_or(PacketError::Empty)?;

    if first & HEADER_FORM_BIT == 0 {
        let dcid = take(packet, 1, short_dcid_len)?;
        let dcid = ConnectionId::from_slice(dcid).ok_or(PacketError::ConnectionIdTooLong(short_dcid_len))?;
        return Ok(PacketHeader::Short { dcid });
    }

    let version_bytes = take(packet, 1, 4)?;
    let version = u32::from_be_bytes([
        version_bytes[0],
        version_bytes[1],
        version_bytes[2],
        version_bytes[3],
    ]);
    let mut offset = 5;
    let dcid = read_cid(packet, &mut offset)?;
    let scid = read_cid(packet, &mut offset)?;

    let packet_type = if version == VERSION_NEGOTIATION {
        None
    } else {
        QuicVersion::from_wire(version)
            .map(|v| LongPacketType::from_bits((first & LONG_PACKET_TYPE_MASK) >> 4, v))
    };

    Ok(PacketHeader::Long {
        version,
        packet_type,
        dcid,
        scid,
    })
}
