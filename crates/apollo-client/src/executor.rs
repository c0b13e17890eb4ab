//! Shared bounded pool for listener dispatch and cache writes.

use apollo_core::{ApolloError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::warn;

/// Runs blocking jobs (listener callbacks, disk writes) with at most `size`
/// of them in flight, and async background loops on the owning runtime.
#[derive(Clone)]
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Binds the pool to the current tokio runtime.
    pub fn new(size: usize) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| {
            ApolloError::ConfigError(format!("A tokio runtime is required: {}", e))
        })?;
        let size = size.max(1);
        Ok(Self {
            handle,
            permits: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Runs `job` on a blocking thread once a slot is free. A panic inside
    /// the job is returned as a `JoinError` instead of unwinding the caller.
    pub async fn run_blocking<F, R>(&self, job: F) -> std::result::Result<R, JoinError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        // The semaphore is never closed, so acquisition only waits.
        let _permit = self.permits.clone().acquire_owned().await;
        self.handle.spawn_blocking(job).await
    }

    /// Fire-and-forget variant of [`run_blocking`](Self::run_blocking).
    pub fn spawn_blocking_job<F>(&self, name: &'static str, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let pool = self.clone();
        self.handle.spawn(async move {
            if let Err(e) = pool.run_blocking(job).await {
                warn!(job = name, error = %e, "Background job failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_requires_runtime() {
        assert!(matches!(WorkerPool::new(4), Err(ApolloError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_panicking_job_is_contained() {
        let pool = WorkerPool::new(2).unwrap();
        let result = pool.run_blocking(|| panic!("listener failure")).await;
        assert!(result.unwrap_err().is_panic());

        assert_eq!(pool.run_blocking(|| 7).await.unwrap(), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bounds_concurrent_jobs() {
        let pool = WorkerPool::new(2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs = (0..8).map(|_| {
            let running = running.clone();
            let peak = peak.clone();
            pool.run_blocking(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
            })
        });
        for result in futures::future::join_all(jobs).await {
            result.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
