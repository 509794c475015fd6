//! Bounded pool for CPU-heavy derivations
//!
//! PBKDF2 and Argon2 run for tens of milliseconds at production cost. Running
//! them on the async executor stalls every other task on that worker, so they
//! go to the blocking thread pool, with a semaphore capping how many run at
//! once.

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// Runs blocking closures with bounded concurrency
#[derive(Clone)]
pub struct DerivationPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl DerivationPool {
    /// Pool allowing `max_concurrent` jobs at once (0 = available parallelism)
    pub fn new(max_concurrent: usize) -> Self {
        let capacity = if max_concurrent == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            max_concurrent
        };

        debug!("Derivation pool capacity: {}", capacity);
        DerivationPool {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.max_concurrent)
    }

    /// Maximum concurrent jobs
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs that could start right now without waiting
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run `job` on the blocking pool once a slot is free
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Encryption("Derivation pool closed".to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| Error::Encryption(format!("Derivation task failed: {}", e)))?
    }
}
