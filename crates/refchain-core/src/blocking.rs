//! Bounded dispatch of synchronous adapter calls off the async workers.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::AdapterError;

/// A semaphore-bounded front to [`tokio::task::spawn_blocking`].
///
/// At most `size` calls run at once; further calls wait for a permit without
/// occupying a blocking thread. The permit travels into the blocking closure,
/// so it is held until the call really finishes even if the awaiting future
/// is dropped.
#[derive(Debug, Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
}

impl BlockingPool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    /// Run `f` on the blocking pool and await its result.
    ///
    /// A panic inside `f` is resumed on the calling task.
    pub async fn run<F, T>(&self, f: F) -> Result<T, AdapterError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AdapterError::Other("blocking pool closed".to_string()))?;

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        });

        match handle.await {
            Ok(value) => Ok(value),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(AdapterError::Other(format!("blocking task aborted: {}", e))),
        }
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runs_closure_and_returns_value() {
        let pool = BlockingPool::new(2);
        let value = pool.run(|| 40 + 2).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrency_is_bounded() {
        let pool = BlockingPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panic_is_resumed_on_caller() {
        let pool = BlockingPool::new(1);
        let joined = tokio::spawn(async move {
            pool.run(|| -> u32 { panic!("adapter exploded") }).await
        })
        .await;
        let err = joined.unwrap_err();
        assert!(err.is_panic());
    }
}
