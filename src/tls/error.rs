use rustls::AlertDescription;
use rustls::CertificateError;

/// Uniform category for TLS failures.
///
/// Everything the TLS library can report is folded into one of these
/// variants so callers handle TLS failure without matching on library
/// internals.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TlsError {
    /// certificate material is missing, unreadable or malformed
    #[error("certificate error: {0}")]
    Certificate(String),
    /// peer certificate failed verification
    #[error("certificate verification failed: {0}")]
    VerificationFailed(String),
    /// configuration input was rejected
    #[error("invalid tls input: {0}")]
    BadInput(String),
    /// record-layer protection failure
    #[error("tls record error: {0}")]
    Record(String),
    #[error("tls handshake failed: {0}")]
    Handshake(String),
    /// the peer sent a fatal alert
    #[error("tls alert received: {0}")]
    Alert(String),
    #[error("unsupported tls version: {0}")]
    UnsupportedVersion(String),
    /// any other protocol-level failure
    #[error("tls protocol error: {0}")]
    Protocol(String),
}

/// Map a library error into the uniform category.
pub(crate) fn classify(err: rustls::Error) -> TlsError {
    use rustls::Error::*;

    match err {
        InvalidCertificate(reason) => match reason {
            CertificateError::UnknownIssuer
            | CertificateError::NotValidForName
            | CertificateError::BadSignature
            | CertificateError::Expired
            | CertificateError::NotValidYet
            | CertificateError::Revoked => TlsError::VerificationFailed(format!("{:?}", reason)),
            other => TlsError::Certificate(format!("{:?}", other)),
        },
        NoCertificatesPresented => {
            TlsError::Certificate("no certificates presented by peer".to_owned())
        }
        AlertReceived(alert) => TlsError::Alert(alert_name(alert)),
        e @ (DecryptError | EncryptError | PeerSentOversizedRecord) => {
            TlsError::Record(e.to_string())
        }
        HandshakeNotComplete => TlsError::Handshake("handshake not complete".to_owned()),
        other => TlsError::Protocol(other.to_string()),
    }
}

fn alert_name(alert: AlertDescription) -> String {
    format!("{:?}", alert)
}

impl From<rustls::Error> for TlsError {
    fn from(err: rustls::Error) -> Self {
        classify(err)
    }
}
