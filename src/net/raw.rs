use std::io;
use std::net::{Shutdown, SocketAddr};

use async_trait::async_trait;
use futures_lite::io::{AsyncReadExt, AsyncWriteExt};
use log::debug;

use crate::options::SessionOptions;
use crate::TransportError;

use super::machine::State;
use super::{socket_id_of, BoxConnection, Connection, ConnectionFd, TcpListener, TcpStream};

/// Plaintext TCP connection.
///
/// The socket handle is clone-able, so TLS variants can layer on top of
/// the same underlying socket without taking it away.
pub struct RawConnection {
    stream: Option<TcpStream>,
    state: State,
    peer: Option<SocketAddr>,
}

impl RawConnection {
    pub fn new() -> Self {
        Self {
            stream: None,
            state: State::Handshake,
            peer: None,
        }
    }

    /// Adopt an already-established socket.
    pub fn from_stream(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            stream: Some(stream),
            state: State::Running,
            peer,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state == State::Running
    }

    fn running_stream_mut(&mut self) -> Result<&mut TcpStream, TransportError> {
        if self.state != State::Running {
            return Err(TransportError::StateNotRecoverable);
        }
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }
}

impl Default for RawConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for RawConnection {
    async fn connect(&mut self, addr: SocketAddr) -> Result<(), TransportError> {
        if self.state != State::Handshake {
            return Err(TransportError::StateNotRecoverable);
        }
        debug!("connecting to {}", addr);
        let stream = TcpStream::connect(addr).await?;
        self.peer = stream.peer_addr().ok();
        self.stream = Some(stream);
        self.state = State::Running;
        debug!("connected to {}", addr);
        Ok(())
    }

    async fn accept(&mut self, listener: &TcpListener) -> Result<(), TransportError> {
        if self.state != State::Handshake {
            return Err(TransportError::StateNotRecoverable);
        }
        let (stream, peer) = listener.accept().await?;
        debug!("accepted connection from {}", peer);
        self.peer = Some(peer);
        self.stream = Some(stream);
        self.state = State::Running;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stream = self.running_stream_mut()?;
        let n = stream.read(buf).await?;
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let stream = self.running_stream_mut()?;
        stream.write_all(buf).await?;
        Ok(buf.len())
    }

    async fn activate_tls(&mut self) -> Result<(), TransportError> {
        Err(TransportError::TlsUnavailable)
    }

    async fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        match &self.stream {
            Some(stream) => stream.shutdown(how),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "not connected")),
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!("closing connection to {:?}", self.peer);
            drop(stream);
        }
        self.state = State::Stop;
    }

    fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn socket_id(&self) -> Option<ConnectionFd> {
        self.stream.as_ref().map(socket_id_of)
    }

    fn options(&self) -> SessionOptions {
        SessionOptions::default()
    }

    fn transport(&self) -> Option<TcpStream> {
        self.stream.clone()
    }

    fn into_lowest_layer(self: Box<Self>) -> BoxConnection {
        self
    }
}

#[cfg(test)]
mod test {
    use std::io::Error;

    use crate::test_async;
    use crate::TransportError;

    use super::{Connection, RawConnection};

    #[test_async]
    async fn test_io_before_connect_fails() -> Result<(), Error> {
        let mut conn = RawConnection::new();

        let mut buf = [7u8; 8];
        assert!(matches!(
            conn.read(&mut buf).await,
            Err(TransportError::StateNotRecoverable)
        ));
        // caller buffer untouched
        assert_eq!(buf, [7u8; 8]);

        assert!(matches!(
            conn.write(b"data").await,
            Err(TransportError::StateNotRecoverable)
        ));
        Ok(())
    }

    #[test_async]
    async fn test_close_is_idempotent() -> Result<(), Error> {
        let mut conn = RawConnection::new();
        conn.close();
        conn.close();

        assert!(matches!(
            conn.read(&mut [0u8; 4]).await,
            Err(TransportError::StateNotRecoverable)
        ));
        assert!(matches!(
            conn.connect(([127, 0, 0, 1], 1).into()).await,
            Err(TransportError::StateNotRecoverable)
        ));
        Ok(())
    }

    #[test_async]
    async fn test_tls_activation_unavailable() -> Result<(), Error> {
        let mut conn = RawConnection::new();
        assert!(matches!(
            conn.activate_tls().await,
            Err(TransportError::TlsUnavailable)
        ));
        Ok(())
    }
}
