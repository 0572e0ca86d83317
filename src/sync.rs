use std::io;
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

use futures_lite::future;
use log::debug;

use crate::net::{BoxConnection, TcpListener};
use crate::options::SessionOptions;
use crate::task::run_block_on;
use crate::timer;
use crate::TransportError;

/// Outcome of a deadline-bounded read.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// the buffer was filled with this many bytes
    Received(usize),
    /// the deadline expired first; no data, connection closed
    TimedOut,
}

/// Blocking façade over any connection.
///
/// Each call drives the async operation to completion on the calling
/// thread. `read` fills the whole buffer; `write` flushes everything.
pub struct SyncConnection {
    conn: BoxConnection,
}

impl SyncConnection {
    pub fn new(conn: BoxConnection) -> Self {
        Self { conn }
    }

    pub fn connect(&mut self, addr: SocketAddr) -> Result<(), TransportError> {
        run_block_on(self.conn.connect(addr))
    }

    pub fn accept(&mut self, listener: &TcpListener) -> Result<(), TransportError> {
        run_block_on(self.conn.accept(listener))
    }

    pub fn activate_tls(&mut self) -> Result<(), TransportError> {
        run_block_on(self.conn.activate_tls())
    }

    /// Write all of `buf`, blocking until flushed.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        run_block_on(self.conn.write(buf))
    }

    /// Fill `buf` completely, blocking until done. A transport that ends
    /// early reports `ConnectionReset`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let conn = &mut self.conn;
        run_block_on(fill(conn, buf))?;
        Ok(buf.len())
    }

    /// Fill `buf` completely unless `timeout` expires first.
    ///
    /// A timeout is not an error: the connection is closed (pending
    /// data on it is meaningless once the deadline passed) and the
    /// outcome reports that nothing was delivered.
    pub fn read_with_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<ReadOutcome, TransportError> {
        let conn = &mut self.conn;
        let outcome = run_block_on(future::or(
            async { Some(fill(conn, buf).await) },
            async {
                timer::after(timeout).await;
                None
            },
        ));

        match outcome {
            Some(Ok(())) => Ok(ReadOutcome::Received(buf.len())),
            Some(Err(err)) => Err(err),
            None => {
                debug!("read deadline expired, closing connection");
                self.conn.close();
                Ok(ReadOutcome::TimedOut)
            }
        }
    }

    pub fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        run_block_on(self.conn.shutdown(how))
    }

    pub fn close(&mut self) {
        self.conn.close();
    }

    pub fn options(&self) -> SessionOptions {
        self.conn.options()
    }

    pub fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.conn.remote_endpoint()
    }

    pub fn into_inner(self) -> BoxConnection {
        self.conn
    }
}

async fn fill(conn: &mut BoxConnection, buf: &mut [u8]) -> Result<(), TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        match conn.read(&mut buf[filled..]).await {
            Ok(0) => return Err(TransportError::ConnectionReset),
            Ok(n) => filled += n,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::net::RawConnection;
    use crate::TransportError;

    use super::SyncConnection;

    #[test]
    fn test_unconnected_io_fails() {
        let mut conn = SyncConnection::new(Box::new(RawConnection::new()));
        let mut buf = [0u8; 8];
        assert!(matches!(
            conn.read(&mut buf),
            Err(TransportError::StateNotRecoverable)
        ));
        assert!(matches!(
            conn.write(b"data"),
            Err(TransportError::StateNotRecoverable)
        ));
        assert!(conn.remote_endpoint().is_none());
    }
}
