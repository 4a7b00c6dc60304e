//! QUIC versions the dispatcher accepts.

/// QUIC version 1 (RFC 9000).
pub const VERSION_1: u32 = 0x0000_0001;

/// QUIC version 2 (RFC 9369).
pub const VERSION_2: u32 = 0x6b33_43cf;

/// IETF draft 29, still sent by some older clients.
pub const DRAFT_29: u32 = 0xff00_001d;

/// Version field of Version Negotiation packets.
pub const VERSION_NEGOTIATION: u32 = 0x0000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuicVersion {
    V1,
    V2,
    Draft29,
}

impl QuicVersion {
    pub const ALL: [QuicVersion; 3] = [QuicVersion::V1, QuicVersion::V2, QuicVersion::Draft29];

    pub fn from_wire(version: u32) -> Option<Self> {
        match version {
            VERSION_1 => Some(QuicVersion::V1),
            VERSION_2 => Some(QuicVersion::V2),
            DRAFT_29 => Some(QuicVersion::Draft29),
            _ => None,
        }
    }

    pub fn wire(self) -> u32 {
        match self {
            QuicVersion::V1 => VERSION_1,
            QuicVersion::V2 => VERSION_2,
            QuicVersion::Draft29 => DRAFT_29,
        }
    }

    /// Long-header packet type bits of an Initial packet.
    ///
    /// Version 2 rotates the type codes (RFC 9369 Section 3.2).
    pub fn initial_type_bits(self) -> u8 {
        match self {
            QuicVersion::V1 | QuicVersion::Draft29 => 0b00,
            QuicVersion::V2 => 0b01,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_values_round_trip() {
        for version in QuicVersion::ALL {
            assert_eq!(QuicVersion::from_wire(version.wire()), Some(version));
        }
        assert_eq!(QuicVersion::from_wire(VERSION_NEGOTIATION), None);
        assert_eq!(QuicVersion::from_wire(0x1a2a3a4a), None);
    }
}
