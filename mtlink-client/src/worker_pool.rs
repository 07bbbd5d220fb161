//! A bounded pool for CPU-bound cryptography.
//!
//! Packing, unpacking and obfuscation keystreams run here so they never stall
//! the scheduler threads that drive sockets.

use std::io;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Workers in the pool shared by one session.
pub const CRYPTO_EXECUTOR_WORKERS: usize = 1;

/// Runs closures on the blocking thread pool, at most `workers` at a time.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(CRYPTO_EXECUTOR_WORKERS)
    }
}

impl WorkerPool {
    /// A pool running at most `workers` jobs concurrently (at least one).
    pub fn new(workers: usize) -> Self {
        Self { permits: Arc::new(Semaphore::new(workers.max(1))) }
    }

    /// Run `job` on the pool and wait for its result.
    ///
    /// A panicking job surfaces as an I/O error instead of tearing down the
    /// caller.
    pub async fn run<T, F>(&self, job: F) -> io::Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| io::Error::other("worker pool closed"))?;
        tokio::task::spawn_blocking(job)
            .await
            .map_err(|e| io::Error::other(format!("worker job failed: {e}")))
    }
}
