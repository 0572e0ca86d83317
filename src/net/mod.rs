use std::io;
use std::net::{Shutdown, SocketAddr};

use async_trait::async_trait;

pub use async_net::{TcpListener, TcpStream};

pub mod machine;

mod dynamic;
mod handle;
mod raw;
mod session;
mod tls_stream;

pub use dynamic::{DynamicTlsConnection, TlsBackend};
pub use handle::ConnectionHandle;
pub use raw::RawConnection;
pub use session::SessionConnection;
pub use tls_stream::{
    AllTlsStream, DefaultClientTlsStream, DefaultServerTlsStream, TlsStreamConnection,
};

use crate::options::SessionOptions;
use crate::TransportError;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        pub type ConnectionFd = std::os::unix::io::RawFd;
    } else if #[cfg(windows)] {
        pub type ConnectionFd = std::os::windows::io::RawSocket;
    } else {
        pub type ConnectionFd = usize;
    }
}

pub type BoxConnection = Box<dyn Connection>;

/// Uniform asynchronous connection.
///
/// Every variant moves through the same conceptual states: it starts
/// unconnected, becomes running after `connect`/`accept`, and ends
/// stopped after `close`. `read` and `write` outside the running state
/// complete immediately with
/// [`StateNotRecoverable`](TransportError::StateNotRecoverable) and
/// leave the caller's buffer untouched.
///
/// Exclusive `&mut self` on every operation keeps each connection
/// single-threaded; share one through a [`ConnectionHandle`] when
/// multiple tasks need it.
#[async_trait]
pub trait Connection: Send {
    /// Establish the transport to `addr` and run any handshake the
    /// variant requires. On return the connection is running.
    async fn connect(&mut self, addr: SocketAddr) -> Result<(), TransportError>;

    /// Accept one inbound transport from `listener`, then run any
    /// handshake the variant requires.
    async fn accept(&mut self, listener: &TcpListener) -> Result<(), TransportError>;

    /// Read available plaintext into `buf`, returning the number of
    /// bytes placed. A plaintext transport reports end-of-input as
    /// `Ok(0)`; TLS variants report an end without a clean TLS shutdown
    /// as [`ConnectionReset`](TransportError::ConnectionReset).
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write all of `buf`, returning its length once fully flushed.
    async fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError>;

    /// Upgrade a running plaintext connection to TLS in place.
    async fn activate_tls(&mut self) -> Result<(), TransportError>;

    /// Half-close the transport. Errors are reported by value, never
    /// panicked.
    async fn shutdown(&mut self, how: Shutdown) -> io::Result<()>;

    /// Release the transport. Idempotent; subsequent operations fail
    /// with `StateNotRecoverable`.
    fn close(&mut self);

    fn remote_endpoint(&self) -> Option<SocketAddr>;

    fn socket_id(&self) -> Option<ConnectionFd>;

    /// Snapshot of the TLS session, computed fresh per call.
    fn options(&self) -> SessionOptions;

    /// Clone of the lowest-layer socket handle, if connected.
    fn transport(&self) -> Option<TcpStream>;

    /// Strip TLS layers and return the plain transport connection.
    fn into_lowest_layer(self: Box<Self>) -> BoxConnection;
}

pub(crate) fn socket_id_of(stream: &TcpStream) -> ConnectionFd {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        return stream.as_raw_fd();
    }
    #[cfg(windows)]
    {
        use std::os::windows::io::AsRawSocket;
        return stream.as_raw_socket();
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = stream;
        return 0;
    }
}
