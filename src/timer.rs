pub use inner::*;

mod inner {

    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use async_io::Timer;
    use futures_lite::future::Future;

    use pin_project::pin_project;

    /// same as `after` but return () to make it compatible as previous
    pub fn sleep(duration: Duration) -> Sleeper {
        Sleeper(after(duration))
    }

    #[pin_project]
    pub struct Sleeper(#[pin] Timer);

    impl Future for Sleeper {
        type Output = ();

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            let this = self.project();
            if let Poll::Ready(_) = this.0.poll(cx) {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        }
    }

    /// wait until `duration` has elapsed.
    ///
    /// this effectively give back control to async execution engine until duration is finished
    ///
    /// # Examples
    ///
    /// ```
    /// use xconnect::timer::after;
    /// use std::time::{Duration, Instant};
    ///
    /// xconnect::task::run(async {
    ///     after(Duration::from_secs(1)).await;
    /// });
    /// ```
    pub fn after(duration: Duration) -> Timer {
        Timer::after(duration)
    }
}

#[cfg(test)]
mod test {

    use std::time::Duration;
    use std::time::Instant;

    use log::debug;

    use crate::test_async;
    use crate::timer::sleep;

    #[test_async]
    async fn test_sleep() -> Result<(), ()> {
        let time_now = Instant::now();

        sleep(Duration::from_millis(10)).await;

        let elapsed = time_now.elapsed();

        debug!("total time elapsed: {:#?}", elapsed);
        assert!(elapsed >= Duration::from_millis(10));
        assert!(elapsed < Duration::from_millis(100));

        Ok(())
    }
}
