use rustls::{ProtocolVersion, SupportedCipherSuite};

use crate::tls::TlsRole;

/// Peer certificate verification policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// accept any peer certificate (testing only)
    None,
    /// require and verify the peer certificate
    Peer,
}

impl Default for VerifyMode {
    fn default() -> Self {
        Self::Peer
    }
}

/// Point-in-time snapshot of a connection's TLS session.
///
/// Computed fresh on every call, never cached. A plaintext connection
/// reports the default (tls inactive, nothing negotiated).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub tls_active: bool,
    pub cipher: Option<String>,
    pub protocol: Option<String>,
    pub peer_certificates: usize,
    pub verify_mode: Option<VerifyMode>,
}

/// Configuration snapshot of a [`TlsContext`](crate::tls::TlsContext).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOptions {
    pub role: TlsRole,
    pub cipher_suites: Vec<String>,
    pub protocol_versions: Vec<String>,
    pub verify_mode: VerifyMode,
}

pub(crate) fn cipher_suite_name(suite: &SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

pub(crate) fn protocol_version_name(version: ProtocolVersion) -> String {
    match version {
        ProtocolVersion::TLSv1_2 => "TLSv1.2".to_owned(),
        ProtocolVersion::TLSv1_3 => "TLSv1.3".to_owned(),
        other => format!("{:?}", other),
    }
}
