use std::io;
use std::net::{Shutdown, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_rustls::{TlsAcceptor, TlsConnector};
use async_trait::async_trait;
use futures_lite::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use log::debug;
use pin_project::pin_project;
use rustls::CommonState;

use crate::options::{cipher_suite_name, protocol_version_name, SessionOptions, VerifyMode};
use crate::tls::{classify, ContextInner, TlsContext, TlsError, TlsRole};
use crate::TransportError;

use super::machine::State;
use super::raw::RawConnection;
use super::{socket_id_of, BoxConnection, Connection, ConnectionFd, TcpListener, TcpStream};

pub type DefaultClientTlsStream = async_rustls::client::TlsStream<TcpStream>;
pub type DefaultServerTlsStream = async_rustls::server::TlsStream<TcpStream>;

/// Client or server TLS stream over a TCP socket, unified so connection
/// code is role-agnostic.
#[pin_project(project = TlsProj)]
pub enum AllTlsStream {
    Client(#[pin] DefaultClientTlsStream),
    Server(#[pin] DefaultServerTlsStream),
}

impl AllTlsStream {
    fn io(&self) -> &TcpStream {
        match self {
            Self::Client(stream) => stream.get_ref().0,
            Self::Server(stream) => stream.get_ref().0,
        }
    }

    pub fn transport(&self) -> TcpStream {
        self.io().clone()
    }

    pub fn into_inner_io(self) -> TcpStream {
        match self {
            Self::Client(stream) => stream.into_inner().0,
            Self::Server(stream) => stream.into_inner().0,
        }
    }

    pub fn session_options(&self, verify_mode: VerifyMode) -> SessionOptions {
        match self {
            Self::Client(stream) => snapshot(stream.get_ref().1, verify_mode),
            Self::Server(stream) => snapshot(stream.get_ref().1, verify_mode),
        }
    }
}

fn snapshot(common: &CommonState, verify_mode: VerifyMode) -> SessionOptions {
    SessionOptions {
        tls_active: true,
        cipher: common.negotiated_cipher_suite().map(|s| cipher_suite_name(&s)),
        protocol: common.protocol_version().map(protocol_version_name),
        peer_certificates: common.peer_certificates().map(|c| c.len()).unwrap_or(0),
        verify_mode: Some(verify_mode),
    }
}

impl AsyncRead for AllTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            TlsProj::Client(stream) => stream.poll_read(cx, buf),
            TlsProj::Server(stream) => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AllTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            TlsProj::Client(stream) => stream.poll_write(cx, buf),
            TlsProj::Server(stream) => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            TlsProj::Client(stream) => stream.poll_flush(cx),
            TlsProj::Server(stream) => stream.poll_flush(cx),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            TlsProj::Client(stream) => stream.poll_close(cx),
            TlsProj::Server(stream) => stream.poll_close(cx),
        }
    }
}

/// async_rustls wraps library failures in io errors; pull the TLS error
/// back out so callers see the uniform category.
fn map_handshake_error(err: io::Error) -> TransportError {
    match err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    {
        Some(tls_err) => TransportError::Tls(classify(tls_err.clone())),
        None => TransportError::Io(err),
    }
}

/// Connection variant that delegates the TLS state machine to the
/// stream wrapper the TLS library ships with.
pub struct TlsStreamConnection {
    ctx: Arc<TlsContext>,
    plain: Option<TcpStream>,
    tls: Option<AllTlsStream>,
    state: State,
    peer: Option<SocketAddr>,
}

impl TlsStreamConnection {
    pub fn new(ctx: Arc<TlsContext>) -> Self {
        Self {
            ctx,
            plain: None,
            tls: None,
            state: State::Handshake,
            peer: None,
        }
    }

    /// Adopt an already-established plaintext socket; the handshake runs
    /// on `activate_tls`.
    pub fn from_stream(stream: TcpStream, ctx: Arc<TlsContext>) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            ctx,
            plain: Some(stream),
            tls: None,
            state: State::Handshake,
            peer,
        }
    }

    async fn handshake(&mut self) -> Result<(), TransportError> {
        if self.tls.is_some() {
            return Err(TransportError::AlreadySecured);
        }
        let stream = self.plain.take().ok_or(TransportError::NotConnected)?;

        let tls = match self.ctx.inner() {
            ContextInner::Client { config, .. } => {
                let name = self.ctx.server_name()?;
                debug!("starting client tls handshake with {:?}", self.peer);
                let connector = TlsConnector::from(config.clone());
                let stream = connector
                    .connect(name, stream)
                    .await
                    .map_err(map_handshake_error)?;
                AllTlsStream::Client(stream)
            }
            ContextInner::Server { config } => {
                debug!("starting server tls handshake with {:?}", self.peer);
                let acceptor = TlsAcceptor::from(config.clone());
                let stream = acceptor.accept(stream).await.map_err(map_handshake_error)?;
                AllTlsStream::Server(stream)
            }
        };

        debug!("tls handshake complete with {:?}", self.peer);
        self.tls = Some(tls);
        self.state = State::Running;
        Ok(())
    }

    fn running_tls_mut(&mut self) -> Result<&mut AllTlsStream, TransportError> {
        if self.state != State::Running {
            return Err(TransportError::StateNotRecoverable);
        }
        self.tls.as_mut().ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl Connection for TlsStreamConnection {
    async fn connect(&mut self, addr: SocketAddr) -> Result<(), TransportError> {
        if self.state != State::Handshake || self.plain.is_some() {
            return Err(TransportError::StateNotRecoverable);
        }
        if self.ctx.role() != TlsRole::Client {
            return Err(TransportError::Tls(TlsError::BadInput(
                "connect requires a client context".to_owned(),
            )));
        }
        let stream = TcpStream::connect(addr).await?;
        self.peer = stream.peer_addr().ok();
        self.plain = Some(stream);
        self.handshake().await
    }

    async fn accept(&mut self, listener: &TcpListener) -> Result<(), TransportError> {
        if self.state != State::Handshake || self.plain.is_some() {
            return Err(TransportError::StateNotRecoverable);
        }
        if self.ctx.role() != TlsRole::Server {
            return Err(TransportError::Tls(TlsError::BadInput(
                "accept requires a server context".to_owned(),
            )));
        }
        let (stream, peer) = listener.accept().await?;
        self.peer = Some(peer);
        self.plain = Some(stream);
        self.handshake().await
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let tls = self.running_tls_mut()?;
        let n = tls.read(buf).await?;
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let tls = self.running_tls_mut()?;
        tls.write_all(buf).await?;
        tls.flush().await?;
        Ok(buf.len())
    }

    async fn activate_tls(&mut self) -> Result<(), TransportError> {
        self.handshake().await
    }

    async fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        match &mut self.tls {
            Some(tls) => {
                // flush the close_notify before touching the socket
                tls.close().await?;
                tls.transport().shutdown(how)
            }
            None => match &self.plain {
                Some(stream) => stream.shutdown(how),
                None => Err(io::Error::new(io::ErrorKind::NotConnected, "not connected")),
            },
        }
    }

    fn close(&mut self) {
        self.tls.take();
        self.plain.take();
        self.state = State::Stop;
    }

    fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn socket_id(&self) -> Option<ConnectionFd> {
        match (&self.tls, &self.plain) {
            (Some(tls), _) => Some(socket_id_of(&tls.transport())),
            (None, Some(plain)) => Some(socket_id_of(plain)),
            (None, None) => None,
        }
    }

    fn options(&self) -> SessionOptions {
        self.tls
            .as_ref()
            .map(|tls| tls.session_options(self.ctx.verify_mode()))
            .unwrap_or_default()
    }

    fn transport(&self) -> Option<TcpStream> {
        match (&self.tls, &self.plain) {
            (Some(tls), _) => Some(tls.transport()),
            (None, Some(plain)) => Some(plain.clone()),
            (None, None) => None,
        }
    }

    fn into_lowest_layer(self: Box<Self>) -> BoxConnection {
        if let Some(tls) = self.tls {
            Box::new(RawConnection::from_stream(tls.into_inner_io()))
        } else if let Some(plain) = self.plain {
            Box::new(RawConnection::from_stream(plain))
        } else {
            Box::new(RawConnection::new())
        }
    }
}
