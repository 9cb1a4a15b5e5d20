use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::trace;

use crate::config::WorkerConfig;
use crate::error::{GreenlightError, Result};

/// Bounded pool for CPU-bound work (inference, regex passes).
///
/// Jobs run on tokio's blocking threads; a semaphore caps how many run at
/// once so a burst of requests cannot starve the runtime.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// A pool running at most `size` jobs concurrently (minimum 1).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.max_blocking_jobs)
    }

    /// Run `job` on a blocking thread once a permit is free.
    ///
    /// A panicking job surfaces as [`GreenlightError::Worker`].
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| GreenlightError::Worker(e.to_string()))?;
        trace!(available = self.permits.available_permits(), "Worker permit acquired");

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| GreenlightError::Worker(e.to_string()))
    }

    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Permits not currently held by a running job.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}
