//! Client-hello admission.

use crate::cid::ConnectionId;
use crate::version::QuicVersion;
use relayd_net::Address;

/// What the dispatcher knows about a client hello before a session exists.
///
/// `sni` and `alpn` stay empty until a TLS layer fills them in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedClientHello {
    pub version: QuicVersion,
    pub connection_id: ConnectionId,
    pub sni: String,
    pub alpn: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub accepted: bool,
    pub details: String,
}

impl AdmissionDecision {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            details: String::new(),
        }
    }

    pub fn reject(details: impl Into<String>) -> Self {
        Self {
            accepted: false,
            details: details.into(),
        }
    }
}

/// Decides whether a new connection may be created for a client hello.
pub trait CryptoStreamHelper: Send + Sync {
    fn can_accept_client_hello(
        &self,
        chlo: &ParsedClientHello,
        client_address: &Address,
        peer_address: &Address,
        self_address: &Address,
    ) -> AdmissionDecision;
}

/// Default helper: every client hello is accepted.
// TODO: reject by SNI or user agent once the TLS layer reports them.
#[derive(Debug, Clone, Copy, Default)]
pub struct CryptoServerStreamHelper;

impl CryptoStreamHelper for CryptoServerStreamHelper {
    fn can_accept_client_hello(
        &self,
        _chlo: &ParsedClientHello,
        _client_address: &Address,
        _peer_address: &Address,
        _self_address: &Address,
    ) -> AdmissionDecision {
        AdmissionDecision::accept()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_helper_accepts() {
        let chlo = ParsedClientHello {
            version: QuicVersion::V1,
            connection_id: ConnectionId::from_slice(&[1; 8]).unwrap(),
            sni: String::new(),
            alpn: Vec::new(),
        };
        let addr: Address = "127.0.0.1:443".parse().unwrap();
        let decision = CryptoServerStreamHelper.can_accept_client_hello(&chlo, &addr, &addr, &addr);
        assert!(decision.accepted);
        assert!(decision.details.is_empty());
    }
}
