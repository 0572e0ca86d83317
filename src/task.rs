use std::future::Future;

use async_std::task;
use async_std::task::JoinHandle;
use log::trace;

/// run future until completion
/// this is typically used at the outermost layer (main or a sync facade)
pub fn run<F>(spawn_closure: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    task::block_on(spawn_closure);
}

pub fn spawn<F, T>(future: F) -> JoinHandle<T>
where
    F: Future<Output = T> + 'static + Send,
    T: Send + 'static,
{
    trace!("spawning future");
    task::spawn(future)
}

/// same as async std block on
pub fn run_block_on<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    task::block_on(f)
}

#[cfg(test)]
mod test {

    use std::sync::atomic::{AtomicI32, Ordering};
    use std::{thread, time};

    use super::run;
    use super::spawn;

    static COUNTER: AtomicI32 = AtomicI32::new(0);

    #[test]
    fn test_spawn() {
        assert_eq!(COUNTER.load(Ordering::SeqCst), 0);

        let ft = async {
            thread::sleep(time::Duration::from_millis(100));
            COUNTER.store(10, Ordering::SeqCst);
        };

        run(async {
            let join_handle = spawn(ft);
            join_handle.await;
        });

        assert_eq!(COUNTER.load(Ordering::SeqCst), 10);
    }
}
