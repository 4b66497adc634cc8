//! Blocking pool
//!
//! Scheduler calls block until the grid answers. They run here, on tokio's
//! blocking threads, with a semaphore bounding how many are in flight at
//! once.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::{Result, WorkerError};

/// Default number of concurrent scheduler calls
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Bounded executor for blocking scheduler calls
///
/// Cloning yields another handle to the same pool.
#[derive(Debug, Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl BlockingPool {
    /// Creates a pool running at most `size` calls at once
    ///
    /// A size of zero is treated as one.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Maximum number of concurrent calls
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of calls that could start right now
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs a blocking task and waits for its result
    ///
    /// Waits for a free slot first; the slot is released when the task
    /// finishes.
    pub async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| WorkerError::pool(e.to_string()))?;

        debug!("Blocking pool slot acquired ({} free)", self.available());

        let handle = tokio::task::spawn_blocking(move || {
            let result = task();
            // Slot is released once the task is done
            drop(permit);
            result
        });

        handle.await.map_err(|e| WorkerError::pool(e.to_string()))?
    }
}

impl Default for BlockingPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}
