use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::options::SessionOptions;
use crate::tls::TlsContext;
use crate::TransportError;

use super::raw::RawConnection;
use super::session::SessionConnection;
use super::tls_stream::TlsStreamConnection;
use super::{BoxConnection, Connection, ConnectionFd, TcpListener, TcpStream};

/// Which TLS termination a dynamic connection upgrades into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsBackend {
    /// delegate to the library's stream wrapper
    Stream,
    /// drive the state machine directly
    Session,
}

/// Connection that starts in plaintext and upgrades to TLS in place.
///
/// All operations forward to the current operational mode. `activate_tls`
/// builds a TLS mode around the same socket handle and swaps it in; the
/// upgrade is one-way.
pub struct DynamicTlsConnection {
    mode: BoxConnection,
    ctx: Arc<TlsContext>,
    backend: TlsBackend,
    secured: bool,
}

impl DynamicTlsConnection {
    pub fn new(ctx: Arc<TlsContext>, backend: TlsBackend) -> Self {
        Self {
            mode: Box::new(RawConnection::new()),
            ctx,
            backend,
            secured: false,
        }
    }

    pub fn is_secured(&self) -> bool {
        self.secured
    }
}

#[async_trait]
impl Connection for DynamicTlsConnection {
    async fn connect(&mut self, addr: SocketAddr) -> Result<(), TransportError> {
        self.mode.connect(addr).await
    }

    async fn accept(&mut self, listener: &TcpListener) -> Result<(), TransportError> {
        self.mode.accept(listener).await
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.mode.read(buf).await
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        self.mode.write(buf).await
    }

    async fn activate_tls(&mut self) -> Result<(), TransportError> {
        if self.secured {
            return Err(TransportError::AlreadySecured);
        }
        let stream = self.mode.transport().ok_or(TransportError::NotConnected)?;
        debug!("upgrading connection to tls, backend: {:?}", self.backend);

        let mut tls: BoxConnection = match self.backend {
            TlsBackend::Stream => {
                Box::new(TlsStreamConnection::from_stream(stream, self.ctx.clone()))
            }
            TlsBackend::Session => {
                Box::new(SessionConnection::from_stream(stream, self.ctx.clone()))
            }
        };
        tls.activate_tls().await?;

        // the old mode only held a clone of the socket handle
        self.mode = tls;
        self.secured = true;
        Ok(())
    }

    async fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        self.mode.shutdown(how).await
    }

    fn close(&mut self) {
        self.mode.close();
    }

    fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.mode.remote_endpoint()
    }

    fn socket_id(&self) -> Option<ConnectionFd> {
        self.mode.socket_id()
    }

    fn options(&self) -> SessionOptions {
        self.mode.options()
    }

    fn transport(&self) -> Option<TcpStream> {
        self.mode.transport()
    }

    fn into_lowest_layer(self: Box<Self>) -> BoxConnection {
        self.mode.into_lowest_layer()
    }
}
