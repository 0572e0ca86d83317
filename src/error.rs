use std::io;

use crate::tls::TlsError;

/// Errors surfaced by connection operations.
///
/// Every async operation completes with `Ok` or one of these; failures
/// never panic across the trait boundary.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Tls(#[from] TlsError),
    /// The connection is not in a state where the operation can run.
    #[error("connection state is not recoverable")]
    StateNotRecoverable,
    /// The peer closed the transport without a clean TLS shutdown.
    #[error("connection reset by peer")]
    ConnectionReset,
    /// The TLS layer could not accept more outbound data.
    #[error("no buffer space available")]
    NoBufferSpace,
    #[error("not connected")]
    NotConnected,
    /// TLS activation was requested on a variant without TLS support.
    #[error("tls is not available on this connection")]
    TlsUnavailable,
    #[error("connection is already secured")]
    AlreadySecured,
}
