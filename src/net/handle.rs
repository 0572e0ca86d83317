use std::io;
use std::net::{Shutdown, SocketAddr};

use async_std::channel::{unbounded, Sender};
use log::{debug, trace};

use crate::dispatch::{completion, Completion};
use crate::options::SessionOptions;
use crate::task;
use crate::TransportError;

use super::BoxConnection;

enum Command {
    Connect(SocketAddr, Completion<Result<(), TransportError>>),
    Read(usize, Completion<Result<Vec<u8>, TransportError>>),
    Write(Vec<u8>, Completion<Result<usize, TransportError>>),
    ActivateTls(Completion<Result<(), TransportError>>),
    Shutdown(Shutdown, Completion<io::Result<()>>),
    Close(Completion<()>),
    Options(Completion<SessionOptions>),
    Post(Box<dyn FnOnce(&mut BoxConnection) + Send>),
}

/// Clone-able handle to a connection owned by a dedicated task.
///
/// The spawned task is the only code that ever touches the connection;
/// callers queue commands over a channel and await each outcome through
/// a one-shot completion. Commands run strictly in send order, so two
/// writes issued A then B hit the wire in that order and complete in
/// that order. This serializes all access without any affinity checks.
#[derive(Clone)]
pub struct ConnectionHandle {
    tx: Sender<Command>,
}

impl ConnectionHandle {
    /// Move `conn` into its own task and return a handle to it.
    pub fn spawn(conn: BoxConnection) -> Self {
        let (tx, rx) = unbounded::<Command>();

        task::spawn(async move {
            let mut conn = conn;
            while let Ok(command) = rx.recv().await {
                match command {
                    Command::Connect(addr, mut done) => {
                        done.complete(conn.connect(addr).await);
                    }
                    Command::Read(max, mut done) => {
                        let mut buf = vec![0u8; max];
                        let result = conn.read(&mut buf).await.map(|n| {
                            buf.truncate(n);
                            buf
                        });
                        done.complete(result);
                    }
                    Command::Write(data, mut done) => {
                        done.complete(conn.write(&data).await);
                    }
                    Command::ActivateTls(mut done) => {
                        done.complete(conn.activate_tls().await);
                    }
                    Command::Shutdown(how, mut done) => {
                        done.complete(conn.shutdown(how).await);
                    }
                    Command::Close(mut done) => {
                        conn.close();
                        done.complete(());
                    }
                    Command::Options(mut done) => {
                        done.complete(conn.options());
                    }
                    Command::Post(op) => {
                        trace!("running posted operation");
                        op(&mut conn);
                    }
                }
            }
            debug!("connection task finished");
        });

        Self { tx }
    }

    async fn send(&self, command: Command) -> Result<(), TransportError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| TransportError::StateNotRecoverable)
    }

    pub async fn connect(&self, addr: SocketAddr) -> Result<(), TransportError> {
        let (done, waiter) = completion();
        self.send(Command::Connect(addr, done)).await?;
        waiter
            .wait()
            .await
            .unwrap_or(Err(TransportError::StateNotRecoverable))
    }

    /// Read up to `max` bytes, returning what arrived.
    pub async fn read(&self, max: usize) -> Result<Vec<u8>, TransportError> {
        let (done, waiter) = completion();
        self.send(Command::Read(max, done)).await?;
        waiter
            .wait()
            .await
            .unwrap_or(Err(TransportError::StateNotRecoverable))
    }

    pub async fn write(&self, data: Vec<u8>) -> Result<usize, TransportError> {
        let (done, waiter) = completion();
        self.send(Command::Write(data, done)).await?;
        waiter
            .wait()
            .await
            .unwrap_or(Err(TransportError::StateNotRecoverable))
    }

    pub async fn activate_tls(&self) -> Result<(), TransportError> {
        let (done, waiter) = completion();
        self.send(Command::ActivateTls(done)).await?;
        waiter
            .wait()
            .await
            .unwrap_or(Err(TransportError::StateNotRecoverable))
    }

    pub async fn shutdown(&self, how: Shutdown) -> Result<io::Result<()>, TransportError> {
        let (done, waiter) = completion();
        self.send(Command::Shutdown(how, done)).await?;
        waiter
            .wait()
            .await
            .ok_or(TransportError::StateNotRecoverable)
    }

    pub async fn close(&self) -> Result<(), TransportError> {
        let (done, waiter) = completion();
        self.send(Command::Close(done)).await?;
        waiter
            .wait()
            .await
            .ok_or(TransportError::StateNotRecoverable)
    }

    pub async fn options(&self) -> Result<SessionOptions, TransportError> {
        let (done, waiter) = completion();
        self.send(Command::Options(done)).await?;
        waiter
            .wait()
            .await
            .ok_or(TransportError::StateNotRecoverable)
    }

    /// Run an arbitrary operation on the owning task, serialized with
    /// every other command. Fire and forget.
    pub async fn post<F>(&self, op: F) -> Result<(), TransportError>
    where
        F: FnOnce(&mut BoxConnection) + Send + 'static,
    {
        self.send(Command::Post(Box::new(op))).await
    }
}

#[cfg(test)]
mod test {
    use std::io::Error;
    use std::sync::{Arc, Mutex};

    use crate::net::RawConnection;
    use crate::test_async;
    use crate::timer::sleep;
    use crate::TransportError;

    use super::ConnectionHandle;

    #[test_async]
    async fn test_posted_operations_run_in_order() -> Result<(), Error> {
        let handle = ConnectionHandle::spawn(Box::new(RawConnection::new()));
        let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5u32 {
            let seen = seen.clone();
            handle
                .post(move |_conn| {
                    seen.lock().unwrap().push(i);
                })
                .await
                .expect("post");
        }

        // options round-trips through the task, so everything queued
        // before it has already run
        let _ = handle.options().await.expect("options");
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        Ok(())
    }

    #[test_async]
    async fn test_unconnected_io_fails_through_handle() -> Result<(), Error> {
        let handle = ConnectionHandle::spawn(Box::new(RawConnection::new()));

        assert!(matches!(
            handle.read(16).await,
            Err(TransportError::StateNotRecoverable)
        ));
        assert!(matches!(
            handle.write(b"data".to_vec()).await,
            Err(TransportError::StateNotRecoverable)
        ));
        Ok(())
    }

    #[test_async]
    async fn test_close_through_handle() -> Result<(), Error> {
        let handle = ConnectionHandle::spawn(Box::new(RawConnection::new()));
        handle.close().await.expect("close");
        assert!(matches!(
            handle.read(16).await,
            Err(TransportError::StateNotRecoverable)
        ));

        // give the task a moment, the handle stays usable for options
        sleep(std::time::Duration::from_millis(10)).await;
        let options = handle.options().await.expect("options");
        assert!(!options.tls_active);
        Ok(())
    }
}
