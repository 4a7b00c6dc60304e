//! Connection IDs and worker-preserving ID replacement.
//!
//! The kernel packet filter in front of the workers hashes only the first
//! [`ROUTING_PREFIX_LEN`] bytes of a packet's destination connection ID to pick
//! a worker socket. Any server connection ID chosen later for a flow must keep
//! those bytes, otherwise the flow migrates to a worker that does not own it.

use bytes::Bytes;
use siphasher::sip::SipHasher13;
use std::fmt;
use std::hash::Hasher;

/// Maximum length of a connection ID (RFC 9000).
pub const MAX_CID_LENGTH: usize = 20;

/// Number of leading connection-ID bytes the packet filter routes on.
pub const ROUTING_PREFIX_LEN: usize = 4;

/// Opaque connection identifier, 0 to 20 bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId {
    bytes: Bytes,
}

impl ConnectionId {
    /// Returns `None` if the ID is longer than [`MAX_CID_LENGTH`].
    pub fn new(bytes: Bytes) -> Option<Self> {
        if bytes.len() > MAX_CID_LENGTH {
            return None;
        }
        Some(Self { bytes })
    }

    /// Copies `slice`. Returns `None` if it is longer than [`MAX_CID_LENGTH`].
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() > MAX_CID_LENGTH {
            return None;
        }
        Some(Self {
            bytes: Bytes::copy_from_slice(slice),
        })
    }

    /// Random ID of `len` bytes (clamped to [`MAX_CID_LENGTH`]).
    pub fn random(len: usize) -> Result<Self, getrandom::Error> {
        let mut buf = [0u8; MAX_CID_LENGTH];
        let len = len.min(MAX_CID_LENGTH);
        getrandom::getrandom(&mut buf[..len])?;
        Ok(Self {
            bytes: Bytes::copy_from_slice(&buf[..len]),
        })
    }

    pub fn empty() -> Self {
        Self {
            bytes: Bytes::new(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The bytes the packet filter routes on. Shorter IDs yield all bytes.
    pub fn routing_prefix(&self) -> &[u8] {
        &self.bytes[..self.bytes.len().min(ROUTING_PREFIX_LEN)]
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({:02x?})", &self.bytes[..])
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.bytes[..] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Derives replacement server connection IDs.
///
/// The replacement is a keyed SipHash-1-3 expansion of the original ID, so
/// the same original always maps to the same replacement for a given key.
/// Its first [`ROUTING_PREFIX_LEN`] bytes are then overwritten with the
/// original's, keeping the flow on the worker that received it.
#[derive(Clone, Copy)]
pub struct ConnectionIdReplacer {
    k0: u64,
    k1: u64,
}

impl ConnectionIdReplacer {
    /// Replacer with a fresh random key.
    pub fn new() -> Self {
        let mut key = [0u8; 16];
        if let Err(e) = getrandom::getrandom(&mut key) {
            // Replacement stays deterministic, only the key becomes guessable.
            tracing::warn!(error = ?e, "failed to get random bytes for connection ID key");
            for (i, byte) in key.iter_mut().enumerate() {
                *byte = (i as u8).wrapping_mul(137);
            }
        }
        let key = u128::from_le_bytes(key);
        Self::with_keys(key as u64, (key >> 64) as u64)
    }

    pub fn with_keys(k0: u64, k1: u64) -> Self {
        Self { k0, k1 }
    }

    /// Replacement for `original` of `expected_len` bytes (clamped to
    /// [`MAX_CID_LENGTH`]). The routing prefix is copied from `original` as
    /// far as both lengths allow.
    pub fn replace(&self, original: &ConnectionId, expected_len: usize) -> ConnectionId {
        let expected_len = expected_len.min(MAX_CID_LENGTH);
        let mut out = [0u8; MAX_CID_LENGTH];

        for (block, chunk) in out[..expected_len].chunks_mut(8).enumerate() {
            let mut hasher = SipHasher13::new_with_keys(self.k0, self.k1);
            hasher.write(original.as_bytes());
            hasher.write_u8(original.len() as u8);
            hasher.write_u8(block as u8);
            let hash = hasher.finish().to_be_bytes();
            chunk.copy_from_slice(&hash[..chunk.len()]);
        }

        let prefix = original.routing_prefix();
        let kept = prefix.len().min(expected_len);
        out[..kept].copy_from_slice(&prefix[..kept]);

        ConnectionId {
            bytes: Bytes::copy_from_slice(&out[..expected_len]),
        }
    }
}

impl Default for ConnectionIdReplacer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionIdReplacer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionIdReplacer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(bytes: &[u8]) -> ConnectionId {
        ConnectionId::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_rejects_oversized_ids() {
        assert!(ConnectionId::from_slice(&[0u8; MAX_CID_LENGTH]).is_some());
        assert!(ConnectionId::from_slice(&[0u8; MAX_CID_LENGTH + 1]).is_none());
        assert!(ConnectionId::new(Bytes::from(vec![0u8; 21])).is_none());
    }

    #[test]
    fn test_display_is_hex() {
        assert_eq!(cid(&[0x01, 0xab]).to_string(), "01ab");
    }

    #[test]
    fn test_replacement_keeps_prefix_and_length() {
        let replacer = ConnectionIdReplacer::with_keys(1, 2);
        let original = cid(&[0xde, 0xad, 0xbe, 0xef, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14]);
        for expected_len in [4, 8, 12, 16, 20] {
            let replaced = replacer.replace(&original, expected_len);
            assert_eq!(replaced.len(), expected_len);
            assert_eq!(&replaced.as_bytes()[..4], &[0xde, 0xad, 0xbe, 0xef]);
        }
    }

    #[test]
    fn test_replacement_is_deterministic_per_key() {
        let original = cid(&[9; 12]);
        let a = ConnectionIdReplacer::with_keys(7, 7);
        let b = ConnectionIdReplacer::with_keys(8, 8);
        assert_eq!(a.replace(&original, 8), a.replace(&original, 8));
        assert_ne!(a.replace(&original, 16), b.replace(&original, 16));
    }

    #[test]
    fn test_replacement_of_short_ids() {
        let replacer = ConnectionIdReplacer::with_keys(3, 4);
        let original = cid(&[0xaa, 0xbb]);
        let replaced = replacer.replace(&original, 8);
        assert_eq!(replaced.len(), 8);
        assert_eq!(&replaced.as_bytes()[..2], &[0xaa, 0xbb]);

        let truncated = replacer.replace(&cid(&[1, 2, 3, 4, 5, 6, 7, 8]), 2);
        assert_eq!(truncated.as_bytes(), &[1, 2]);
    }

    #[test]
    fn test_random_ids() {
        let a = ConnectionId::random(8).unwrap();
        let b = ConnectionId::random(8).unwrap();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
        assert_eq!(ConnectionId::random(64).unwrap().len(), MAX_CID_LENGTH);
    }
}
