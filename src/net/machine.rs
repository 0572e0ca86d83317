use std::collections::VecDeque;
use std::io;

use bytes::Bytes;
use log::trace;

use crate::dispatch::Completion;
use crate::tls::{DecryptOutcome, StepOutcome, TlsSession};
use crate::TransportError;

/// Capacity of the raw inbound buffer, sized to hold one maximum TLS record.
pub const PAGE_SIZE: usize = 16384;

/// Lifecycle state of a state-machine connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// transport up, TLS handshake in progress
    Handshake,
    /// handshake complete, application data flows
    Running,
    /// terminal, nothing runs anymore
    Stop,
}

/// External stimulus dispatched into the machine.
pub enum Event<'a> {
    /// raw bytes arrived (or the transport just came up) during handshake
    Handshake,
    /// a queued write should be pushed through the TLS layer
    Sdu,
    /// the caller wants plaintext out of the TLS layer
    Pdu {
        buf: &'a mut [u8],
        filled: &'a mut usize,
    },
}

/// What the driver must do after a dispatch.
#[derive(Debug)]
pub enum Action {
    /// re-dispatch immediately against the (possibly new) state
    Continue,
    /// event fully handled, wait for the next external stimulus
    Done,
    /// handshake finished, connection is now running
    Ready,
    Failed(TransportError),
}

/// A write admitted to the queue, completed when its bytes reach the
/// TLS layer or when the connection dies.
pub struct PendingWrite {
    pub data: Bytes,
    pub done: Completion<Result<usize, TransportError>>,
}

/// Bounded ring over raw inbound transport bytes.
///
/// The TLS session consumes it incrementally through `io::Read`; the
/// driver refills it from the transport, never exceeding capacity.
pub struct PageBuffer {
    data: VecDeque<u8>,
    capacity: usize,
}

impl PageBuffer {
    pub fn new() -> Self {
        Self::with_capacity(PAGE_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Free space left before the bound.
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Append as much of `bytes` as fits, returning how much was taken.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remaining());
        self.data.extend(&bytes[..n]);
        n
    }
}

impl Default for PageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl io::Read for PageBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.data.len());
        for (slot, byte) in buf.iter_mut().zip(self.data.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

/// Pure transition function of the TLS connection state machine.
///
/// Dispatches one event against the current state, mutating the session,
/// the inbound buffer and the write queue, and returns the next state
/// plus what the driver must do. The driver loops on `Continue`,
/// returns to its event source on `Done`/`Ready`, and tears down on
/// `Failed`.
pub fn advance(
    state: State,
    event: Event<'_>,
    session: &mut TlsSession,
    incoming: &mut PageBuffer,
    pending: &mut VecDeque<PendingWrite>,
) -> (State, Action) {
    match (state, event) {
        (State::Handshake, Event::Handshake) => match session.handshake_step(incoming) {
            StepOutcome::Done => (State::Running, Action::Ready),
            StepOutcome::WouldBlock => (State::Handshake, Action::Done),
            StepOutcome::Failed(err) => (State::Stop, Action::Failed(err.into())),
        },

        (State::Handshake, Event::Sdu) | (State::Handshake, Event::Pdu { .. }) => (
            State::Handshake,
            Action::Failed(TransportError::StateNotRecoverable),
        ),

        // late handshake stimulus after completion is harmless
        (State::Running, Event::Handshake) => (State::Running, Action::Done),

        (State::Running, Event::Sdu) => {
            let mut write = match pending.pop_front() {
                Some(write) => write,
                None => return (State::Running, Action::Done),
            };
            match session.encrypt(&write.data) {
                Ok(n) => {
                    trace!("encrypted sdu of {} bytes", n);
                    write.done.complete(Ok(n));
                    if pending.is_empty() {
                        (State::Running, Action::Done)
                    } else {
                        (State::Running, Action::Continue)
                    }
                }
                Err(_) => {
                    write.done.complete(Err(TransportError::NoBufferSpace));
                    (State::Stop, Action::Failed(TransportError::NoBufferSpace))
                }
            }
        }

        (State::Running, Event::Pdu { buf, filled }) => {
            if *filled >= buf.len() {
                return (State::Running, Action::Done);
            }
            if let Err(err) = session.feed(incoming) {
                return (State::Stop, Action::Failed(err.into()));
            }
            loop {
                match session.decrypt(&mut buf[*filled..]) {
                    DecryptOutcome::Data(n) => {
                        *filled += n;
                        if *filled == buf.len() {
                            return (State::Running, Action::Done);
                        }
                    }
                    DecryptOutcome::WouldBlock => {
                        return if *filled > 0 {
                            (State::Running, Action::Done)
                        } else {
                            // nothing available, the driver must fetch raw bytes
                            (State::Running, Action::Continue)
                        };
                    }
                    DecryptOutcome::Closed => {
                        return if *filled > 0 {
                            (State::Stop, Action::Done)
                        } else {
                            (State::Stop, Action::Failed(TransportError::ConnectionReset))
                        };
                    }
                    DecryptOutcome::Failed(err) => {
                        return (State::Stop, Action::Failed(err.into()));
                    }
                }
            }
        }

        (State::Stop, Event::Sdu) => {
            // writes not yet on the wire are failed through their completions
            while let Some(mut write) = pending.pop_front() {
                write.done.complete(Err(TransportError::StateNotRecoverable));
            }
            (
                State::Stop,
                Action::Failed(TransportError::StateNotRecoverable),
            )
        }

        (State::Stop, _) => (
            State::Stop,
            Action::Failed(TransportError::StateNotRecoverable),
        ),
    }
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;
    use std::io::Read;

    use bytes::Bytes;

    use crate::dispatch::completion;
    use crate::options::VerifyMode;
    use crate::tls::{TlsContext, TlsMaterial, TlsSession};

    use super::{advance, Action, Event, PageBuffer, PendingWrite, State};

    const CA_PATH: &str = "certs/test/ca.crt";
    const SERVER_CERT: &str = "certs/test/server.crt";
    const SERVER_KEY: &str = "certs/test/server.key";

    #[test]
    fn test_page_buffer_bounds() {
        let mut page = PageBuffer::with_capacity(4);
        assert!(page.is_empty());
        assert_eq!(page.push(b"abcdef"), 4);
        assert_eq!(page.len(), 4);
        assert_eq!(page.remaining(), 0);
        assert_eq!(page.push(b"x"), 0);

        let mut out = [0u8; 3];
        assert_eq!(page.read(&mut out).unwrap(), 3);
        assert_eq!(&out, b"abc");
        assert_eq!(page.remaining(), 3);
        assert_eq!(page.push(b"yz"), 2);

        let mut rest = [0u8; 8];
        assert_eq!(page.read(&mut rest).unwrap(), 3);
        assert_eq!(&rest[..3], b"dyz");
    }

    struct Peer {
        session: TlsSession,
        state: State,
        incoming: PageBuffer,
        pending: VecDeque<PendingWrite>,
        ready: u32,
    }

    impl Peer {
        fn new(ctx: &TlsContext) -> Self {
            Self {
                session: TlsSession::new(ctx).expect("session"),
                state: State::Handshake,
                incoming: PageBuffer::new(),
                pending: VecDeque::new(),
                ready: 0,
            }
        }

        fn step_handshake(&mut self) {
            let (next, action) = advance(
                self.state,
                Event::Handshake,
                &mut self.session,
                &mut self.incoming,
                &mut self.pending,
            );
            self.state = next;
            match action {
                Action::Ready => self.ready += 1,
                Action::Done => {}
                other => panic!("unexpected handshake action: {:?}", other),
            }
        }

        fn transfer_to(&mut self, other: &mut Peer) {
            let out = self.session.take_outgoing();
            let mut offset = 0;
            while offset < out.len() {
                offset += other.incoming.push(&out[offset..]);
            }
        }
    }

    fn contexts() -> (TlsContext, TlsContext) {
        let client = TlsContext::client(TlsMaterial::new().with_ca(CA_PATH), "localhost")
            .expect("client ctx");
        let server = TlsContext::server(
            TlsMaterial::new()
                .with_cert(SERVER_CERT)
                .with_key(SERVER_KEY)
                .with_verify_mode(VerifyMode::None),
        )
        .expect("server ctx");
        (client, server)
    }

    fn handshake(client: &mut Peer, server: &mut Peer) {
        for _ in 0..10 {
            client.step_handshake();
            client.transfer_to(server);
            server.step_handshake();
            server.transfer_to(client);
            if client.state == State::Running && server.state == State::Running {
                return;
            }
        }
        panic!("handshake did not converge");
    }

    #[test]
    fn test_handshake_would_block_then_ready_once() {
        let (client_ctx, server_ctx) = contexts();
        let mut client = Peer::new(&client_ctx);
        let mut server = Peer::new(&server_ctx);

        // first step has nothing to read: stays in handshake, no ready
        client.step_handshake();
        assert_eq!(client.state, State::Handshake);
        assert_eq!(client.ready, 0);

        handshake(&mut client, &mut server);
        assert_eq!(client.ready, 1);
        assert_eq!(server.ready, 1);

        // late handshake stimulus after completion stays harmless
        client.step_handshake();
        assert_eq!(client.ready, 1);
        assert_eq!(client.state, State::Running);
    }

    #[test]
    fn test_sdu_pdu_round_trip() {
        let (client_ctx, server_ctx) = contexts();
        let mut client = Peer::new(&client_ctx);
        let mut server = Peer::new(&server_ctx);
        handshake(&mut client, &mut server);

        let payload = b"hello over tls";
        let (done, waiter) = completion();
        client.pending.push_back(PendingWrite {
            data: Bytes::copy_from_slice(payload),
            done,
        });

        let (next, action) = advance(
            client.state,
            Event::Sdu,
            &mut client.session,
            &mut client.incoming,
            &mut client.pending,
        );
        client.state = next;
        assert!(matches!(action, Action::Done));
        let delivered = crate::task::run_block_on(waiter.wait());
        assert!(matches!(delivered, Some(Ok(n)) if n == payload.len()));

        client.transfer_to(&mut server);

        let mut buf = vec![0u8; payload.len()];
        let mut filled = 0;
        let (next, action) = advance(
            server.state,
            Event::Pdu {
                buf: &mut buf,
                filled: &mut filled,
            },
            &mut server.session,
            &mut server.incoming,
            &mut server.pending,
        );
        server.state = next;
        assert!(matches!(action, Action::Done));
        assert_eq!(filled, payload.len());
        assert_eq!(&buf, payload);
    }

    #[test]
    fn test_pdu_without_data_asks_for_more() {
        let (client_ctx, server_ctx) = contexts();
        let mut client = Peer::new(&client_ctx);
        let mut server = Peer::new(&server_ctx);
        handshake(&mut client, &mut server);

        let mut buf = [0u8; 16];
        let mut filled = 0;
        let (next, action) = advance(
            server.state,
            Event::Pdu {
                buf: &mut buf,
                filled: &mut filled,
            },
            &mut server.session,
            &mut server.incoming,
            &mut server.pending,
        );
        assert_eq!(next, State::Running);
        assert!(matches!(action, Action::Continue));
        assert_eq!(filled, 0);
    }

    #[test]
    fn test_decrypt_failure_queues_alert() {
        let (client_ctx, server_ctx) = contexts();
        let mut client = Peer::new(&client_ctx);
        let mut server = Peer::new(&server_ctx);
        handshake(&mut client, &mut server);

        // valid record, corrupted in flight
        client.session.encrypt(b"boom").expect("encrypt");
        let mut record = client.session.take_outgoing();
        let last = record.len() - 1;
        record[last] ^= 0xff;
        assert_eq!(server.incoming.push(&record), record.len());

        let mut buf = [0u8; 16];
        let mut filled = 0;
        let (next, action) = advance(
            server.state,
            Event::Pdu {
                buf: &mut buf,
                filled: &mut filled,
            },
            &mut server.session,
            &mut server.incoming,
            &mut server.pending,
        );
        assert_eq!(next, State::Stop);
        assert!(matches!(
            action,
            Action::Failed(crate::TransportError::Tls(_))
        ));
        // the fatal alert must still reach the transport
        assert!(!server.session.take_outgoing().is_empty());
    }

    #[test]
    fn test_stopped_machine_fails_queued_writes() {
        let (client_ctx, _) = contexts();
        let mut client = Peer::new(&client_ctx);
        client.state = State::Stop;

        let (done, waiter) = completion();
        client.pending.push_back(PendingWrite {
            data: Bytes::from_static(b"never sent"),
            done,
        });

        let (next, action) = advance(
            client.state,
            Event::Sdu,
            &mut client.session,
            &mut client.incoming,
            &mut client.pending,
        );
        assert_eq!(next, State::Stop);
        assert!(matches!(
            action,
            Action::Failed(crate::TransportError::StateNotRecoverable)
        ));
        let delivered = crate::task::run_block_on(waiter.wait());
        assert!(matches!(
            delivered,
            Some(Err(crate::TransportError::StateNotRecoverable))
        ));
    }

    #[test]
    fn test_io_before_handshake_completes() {
        let (client_ctx, _) = contexts();
        let mut client = Peer::new(&client_ctx);

        let mut buf = [0u8; 4];
        let mut filled = 0;
        let (next, action) = advance(
            client.state,
            Event::Pdu {
                buf: &mut buf,
                filled: &mut filled,
            },
            &mut client.session,
            &mut client.incoming,
            &mut client.pending,
        );
        assert_eq!(next, State::Handshake);
        assert!(matches!(
            action,
            Action::Failed(crate::TransportError::StateNotRecoverable)
        ));
        assert_eq!(filled, 0);
        assert_eq!(buf, [0u8; 4]);
    }
}
