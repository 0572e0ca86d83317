use std::collections::VecDeque;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, trace};

use crate::dispatch::completion;
use crate::options::SessionOptions;
use crate::tls::{TlsContext, TlsSession};
use crate::TransportError;

use super::machine::{advance, Action, Event, PageBuffer, PendingWrite, State, PAGE_SIZE};
use super::raw::RawConnection;
use super::{BoxConnection, Connection, ConnectionFd, TcpListener, TcpStream};

/// Connection variant that drives the TLS state machine itself.
///
/// A sans-IO [`TlsSession`] sits between a plaintext [`RawConnection`]
/// and the caller; [`advance`] dispatches every event. Raw inbound bytes
/// land in a bounded page buffer, writes go through a FIFO queue, and at
/// most one raw read is outstanding at any time.
pub struct SessionConnection {
    ctx: Arc<TlsContext>,
    lowest: RawConnection,
    session: Option<TlsSession>,
    state: State,
    incoming: PageBuffer,
    pending: VecDeque<PendingWrite>,
}

impl SessionConnection {
    pub fn new(ctx: Arc<TlsContext>) -> Self {
        Self {
            ctx,
            lowest: RawConnection::new(),
            session: None,
            state: State::Handshake,
            incoming: PageBuffer::new(),
            pending: VecDeque::new(),
        }
    }

    /// Adopt an already-established plaintext socket; the handshake runs
    /// on `activate_tls`.
    pub fn from_stream(stream: TcpStream, ctx: Arc<TlsContext>) -> Self {
        Self {
            ctx,
            lowest: RawConnection::from_stream(stream),
            session: None,
            state: State::Handshake,
            incoming: PageBuffer::new(),
            pending: VecDeque::new(),
        }
    }

    async fn activate(&mut self) -> Result<(), TransportError> {
        if self.session.is_some() {
            return Err(TransportError::AlreadySecured);
        }
        if !self.lowest.is_running() {
            return Err(TransportError::NotConnected);
        }
        self.session = Some(TlsSession::new(&self.ctx)?);
        self.state = State::Handshake;
        debug!("starting tls handshake with {:?}", self.lowest.remote_endpoint());
        self.drive_handshake().await
    }

    async fn drive_handshake(&mut self) -> Result<(), TransportError> {
        loop {
            let (next, action) = self.dispatch(Event::Handshake)?;
            self.state = next;
            // handshake records produced by the step go out before we wait
            self.flush_session().await?;
            match action {
                Action::Ready => {
                    debug!("tls handshake complete with {:?}", self.lowest.remote_endpoint());
                    return Ok(());
                }
                Action::Done => self.fill_incoming().await?,
                Action::Continue => {}
                Action::Failed(err) => {
                    self.fail_pending();
                    return Err(err);
                }
            }
        }
    }

    fn dispatch(&mut self, event: Event<'_>) -> Result<(State, Action), TransportError> {
        let session = match self.session.as_mut() {
            Some(session) => session,
            None => return Err(TransportError::NotConnected),
        };
        Ok(advance(
            self.state,
            event,
            session,
            &mut self.incoming,
            &mut self.pending,
        ))
    }

    /// Push every raw record the session has produced onto the wire,
    /// preserving issue order.
    async fn flush_session(&mut self) -> Result<(), TransportError> {
        let out = match self.session.as_mut() {
            Some(session) => session.take_outgoing(),
            None => return Ok(()),
        };
        if out.is_empty() {
            return Ok(());
        }
        trace!("flushing {} raw bytes", out.len());
        if let Err(err) = self.lowest.write(&out).await {
            self.state = State::Stop;
            self.fail_pending();
            return Err(err);
        }
        Ok(())
    }

    /// One raw read into the page buffer. Never issued concurrently:
    /// every path awaits the previous read before asking again.
    async fn fill_incoming(&mut self) -> Result<(), TransportError> {
        let room = self.incoming.remaining().min(PAGE_SIZE);
        if room == 0 {
            return Err(TransportError::NoBufferSpace);
        }
        let mut chunk = vec![0u8; room];
        let n = self.lowest.read(&mut chunk).await?;
        if n == 0 {
            self.state = State::Stop;
            self.fail_pending();
            return Err(TransportError::ConnectionReset);
        }
        self.incoming.push(&chunk[..n]);
        Ok(())
    }

    fn fail_pending(&mut self) {
        while let Some(mut write) = self.pending.pop_front() {
            write.done.complete(Err(TransportError::StateNotRecoverable));
        }
    }
}

#[async_trait]
impl Connection for SessionConnection {
    async fn connect(&mut self, addr: SocketAddr) -> Result<(), TransportError> {
        self.lowest.connect(addr).await?;
        self.activate().await
    }

    async fn accept(&mut self, listener: &TcpListener) -> Result<(), TransportError> {
        self.lowest.accept(listener).await?;
        self.activate().await
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.state != State::Running {
            return Err(TransportError::StateNotRecoverable);
        }
        let mut filled = 0;
        loop {
            let (next, action) = self.dispatch(Event::Pdu {
                buf: &mut *buf,
                filled: &mut filled,
            })?;
            self.state = next;
            // records queued while reading (alerts, key updates) still
            // belong on the wire
            match action {
                Action::Done | Action::Ready => {
                    let _ = self.flush_session().await;
                    return Ok(filled);
                }
                Action::Continue => {
                    self.flush_session().await?;
                    self.fill_incoming().await?;
                }
                Action::Failed(err) => {
                    let _ = self.flush_session().await;
                    self.fail_pending();
                    return Err(err);
                }
            }
        }
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        if self.state != State::Running {
            return Err(TransportError::StateNotRecoverable);
        }
        let (done, waiter) = completion();
        self.pending.push_back(PendingWrite {
            data: Bytes::copy_from_slice(buf),
            done,
        });

        loop {
            let (next, action) = self.dispatch(Event::Sdu)?;
            self.state = next;
            match action {
                Action::Done | Action::Ready => {
                    self.flush_session().await?;
                    break;
                }
                Action::Continue => self.flush_session().await?,
                Action::Failed(_) => {
                    // the queued completion already carries the failure
                    self.fail_pending();
                    break;
                }
            }
        }

        waiter
            .wait()
            .await
            .unwrap_or(Err(TransportError::StateNotRecoverable))
    }

    async fn activate_tls(&mut self) -> Result<(), TransportError> {
        self.activate().await
    }

    async fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        if let Some(session) = self.session.as_mut() {
            session.send_close_notify();
            // best effort; the socket shutdown still proceeds
            let _ = self.flush_session().await;
        }
        self.lowest.shutdown(how).await
    }

    fn close(&mut self) {
        self.session.take();
        self.fail_pending();
        self.lowest.close();
        self.state = State::Stop;
    }

    fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.lowest.remote_endpoint()
    }

    fn socket_id(&self) -> Option<ConnectionFd> {
        self.lowest.socket_id()
    }

    fn options(&self) -> SessionOptions {
        self.session
            .as_ref()
            .map(|session| session.options())
            .unwrap_or_default()
    }

    fn transport(&self) -> Option<TcpStream> {
        self.lowest.transport()
    }

    fn into_lowest_layer(self: Box<Self>) -> BoxConnection {
        Box::new(self.lowest)
    }
}

#[cfg(test)]
mod test {
    use std::io::Error;
    use std::sync::Arc;

    use crate::options::VerifyMode;
    use crate::test_async;
    use crate::tls::{TlsContext, TlsMaterial};
    use crate::TransportError;

    use super::{Connection, SessionConnection};

    fn client_ctx() -> Arc<TlsContext> {
        Arc::new(
            TlsContext::client(
                TlsMaterial::new().with_verify_mode(VerifyMode::None),
                "localhost",
            )
            .expect("client ctx"),
        )
    }

    #[test_async]
    async fn test_io_before_handshake_fails() -> Result<(), Error> {
        let mut conn = SessionConnection::new(client_ctx());

        let mut buf = [3u8; 16];
        assert!(matches!(
            conn.read(&mut buf).await,
            Err(TransportError::StateNotRecoverable)
        ));
        assert_eq!(buf, [3u8; 16]);

        assert!(matches!(
            conn.write(b"early").await,
            Err(TransportError::StateNotRecoverable)
        ));
        Ok(())
    }

    #[test_async]
    async fn test_activate_without_transport() -> Result<(), Error> {
        let mut conn = SessionConnection::new(client_ctx());
        assert!(matches!(
            conn.activate_tls().await,
            Err(TransportError::NotConnected)
        ));
        Ok(())
    }

    #[test_async]
    async fn test_close_is_idempotent() -> Result<(), Error> {
        let mut conn = SessionConnection::new(client_ctx());
        conn.close();
        conn.close();
        assert!(matches!(
            conn.read(&mut [0u8; 4]).await,
            Err(TransportError::StateNotRecoverable)
        ));
        Ok(())
    }
}
