use std::io::{self, Read, Write};

use log::{debug, trace};
use rustls::{ClientConnection, Connection, ServerConnection};

use crate::net::machine::PageBuffer;
use crate::options::{cipher_suite_name, protocol_version_name, SessionOptions, VerifyMode};

use super::context::{ContextInner, TlsContext};
use super::error::TlsError;

/// Result of one handshake step.
pub enum StepOutcome {
    /// handshake finished
    Done,
    /// more raw bytes are needed from the transport
    WouldBlock,
    Failed(TlsError),
}

/// Result of pulling plaintext out of the session.
pub enum DecryptOutcome {
    /// plaintext bytes written into the caller buffer
    Data(usize),
    /// nothing decryptable yet
    WouldBlock,
    /// peer closed the session cleanly
    Closed,
    Failed(TlsError),
}

/// Sans-IO TLS session over a shared context.
///
/// The session never touches a socket: raw inbound bytes are pushed in
/// with [`feed`](Self::feed), raw outbound records pulled out with
/// [`take_outgoing`](Self::take_outgoing). The caller owns the transport.
pub struct TlsSession {
    conn: Connection,
    verify_mode: VerifyMode,
}

impl TlsSession {
    pub fn new(ctx: &TlsContext) -> Result<Self, TlsError> {
        let conn = match ctx.inner() {
            ContextInner::Client { config, .. } => {
                let name = ctx.server_name()?;
                Connection::Client(ClientConnection::new(config.clone(), name)?)
            }
            ContextInner::Server { config } => {
                Connection::Server(ServerConnection::new(config.clone())?)
            }
        };
        Ok(Self {
            conn,
            verify_mode: ctx.verify_mode(),
        })
    }

    /// Push buffered raw bytes into the session and process them.
    /// Returns the number of raw bytes consumed.
    pub fn feed(&mut self, incoming: &mut PageBuffer) -> Result<usize, TlsError> {
        let mut consumed = 0;
        // read_tls treats an empty source as EOF, so never offer one
        while !incoming.is_empty() && self.conn.wants_read() {
            let n = self
                .conn
                .read_tls(incoming)
                .map_err(|err| TlsError::Record(err.to_string()))?;
            consumed += n;
            self.conn.process_new_packets().map_err(super::classify)?;
        }
        trace!("fed {} raw bytes into tls session", consumed);
        Ok(consumed)
    }

    /// Step the handshake against buffered raw bytes.
    pub fn handshake_step(&mut self, incoming: &mut PageBuffer) -> StepOutcome {
        if let Err(err) = self.feed(incoming) {
            return StepOutcome::Failed(err);
        }
        if self.conn.is_handshaking() {
            StepOutcome::WouldBlock
        } else {
            debug!(
                "handshake complete, protocol: {:?}, cipher: {:?}",
                self.conn.protocol_version(),
                self.conn.negotiated_cipher_suite()
            );
            StepOutcome::Done
        }
    }

    /// Submit plaintext for encryption. Raw records become available
    /// through [`take_outgoing`](Self::take_outgoing).
    pub fn encrypt(&mut self, data: &[u8]) -> Result<usize, TlsError> {
        let mut written = 0;
        while written < data.len() {
            let n = self
                .conn
                .writer()
                .write(&data[written..])
                .map_err(|err| TlsError::Record(err.to_string()))?;
            if n == 0 {
                return Err(TlsError::Record(
                    "tls session accepted no plaintext".to_owned(),
                ));
            }
            written += n;
        }
        Ok(written)
    }

    /// Pull decrypted plaintext into the caller buffer.
    pub fn decrypt(&mut self, buf: &mut [u8]) -> DecryptOutcome {
        match self.conn.reader().read(buf) {
            Ok(0) => DecryptOutcome::Closed,
            Ok(n) => DecryptOutcome::Data(n),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => DecryptOutcome::WouldBlock,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => DecryptOutcome::Closed,
            Err(err) => DecryptOutcome::Failed(TlsError::Record(err.to_string())),
        }
    }

    /// Drain pending raw records destined for the transport.
    pub fn take_outgoing(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut out) {
                Ok(_) => {}
                Err(err) => {
                    // Vec sink cannot fail; guard anyway
                    debug!("write_tls into buffer failed: {}", err);
                    break;
                }
            }
        }
        out
    }

    pub fn send_close_notify(&mut self) {
        self.conn.send_close_notify();
    }

    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    pub fn options(&self) -> SessionOptions {
        SessionOptions {
            tls_active: true,
            cipher: self
                .conn
                .negotiated_cipher_suite()
                .map(|s| cipher_suite_name(&s)),
            protocol: self.conn.protocol_version().map(protocol_version_name),
            peer_certificates: self.conn.peer_certificates().map(|c| c.len()).unwrap_or(0),
            verify_mode: Some(self.verify_mode),
        }
    }
}
