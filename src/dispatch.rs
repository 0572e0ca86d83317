use async_std::channel::{bounded, Receiver, Sender};
use log::debug;

/// Create a one-shot completion pair.
///
/// The `Completion` side delivers a single value; the `Pending` side awaits
/// it. Dropping the `Completion` without delivering resolves the wait with
/// `None`, so an outcome is never silently lost.
pub fn completion<T>() -> (Completion<T>, Pending<T>) {
    let (tx, rx) = bounded(1);
    (Completion { slot: Some(tx) }, Pending { rx })
}

/// One-shot delivery handle.
///
/// The sender slot is emptied before the value is handed over, so a second
/// `complete` finds nothing to deliver and is dropped with a debug log.
pub struct Completion<T> {
    slot: Option<Sender<T>>,
}

impl<T> Completion<T> {
    pub fn complete(&mut self, value: T) {
        match self.slot.take() {
            Some(tx) => {
                if tx.try_send(value).is_err() {
                    debug!("completion receiver gone, result dropped");
                }
            }
            None => {
                debug!("duplicate completion dropped, result already delivered");
            }
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.slot.is_none()
    }
}

/// Awaitable side of a one-shot completion.
pub struct Pending<T> {
    rx: Receiver<T>,
}

impl<T> Pending<T> {
    /// Wait for the outcome. `None` means the `Completion` was dropped
    /// without delivering.
    pub async fn wait(self) -> Option<T> {
        self.rx.recv().await.ok()
    }
}

#[cfg(test)]
mod test {
    use std::io::Error;

    use crate::test_async;

    use super::completion;

    #[test_async]
    async fn test_deliver_once() -> Result<(), Error> {
        let (mut done, waiter) = completion();
        assert!(!done.is_delivered());
        done.complete(42u32);
        assert!(done.is_delivered());
        assert_eq!(waiter.wait().await, Some(42));
        Ok(())
    }

    #[test_async]
    async fn test_duplicate_is_dropped() -> Result<(), Error> {
        let (mut done, waiter) = completion();
        done.complete(1u32);
        done.complete(2u32);
        assert_eq!(waiter.wait().await, Some(1));
        Ok(())
    }

    #[test_async]
    async fn test_dropped_completion_resolves_none() -> Result<(), Error> {
        let (done, waiter) = completion::<u32>();
        drop(done);
        assert_eq!(waiter.wait().await, None);
        Ok(())
    }
}
