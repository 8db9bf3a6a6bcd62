use std::sync::{PoisonError, RwLock};

use taskforge_core::TaskError;
use tracing::{error, info};

use super::{Executor, Job};
use crate::task::panic_message;

/// Bounded pool of worker threads backed by `rayon`.
pub struct WorkerPool {
    name: String,
    threads: usize,
    pool: RwLock<Option<rayon::ThreadPool>>,
}

impl WorkerPool {
    /// Build a pool with `threads` workers (at least one), named `{name}-{i}`.
    pub fn new(name: impl Into<String>, threads: usize) -> Result<Self, TaskError> {
        let name = name.into();
        let threads = threads.max(1);
        let prefix = name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{}-{}", prefix, i))
            .panic_handler(|panic| {
                error!("Worker thread caught a panic: {}", panic_message(panic.as_ref()));
            })
            .build()
            .map_err(|e| TaskError::Pool(e.to_string()))?;

        info!(pool = %name, threads, "Worker pool started");
        Ok(Self {
            name,
            threads,
            pool: RwLock::new(Some(pool)),
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

impl Executor for WorkerPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, job: Job) -> Result<(), TaskError> {
        let guard = self.pool.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(pool) => {
                pool.spawn(job);
                Ok(())
            }
            None => Err(TaskError::PoolShutdown),
        }
    }

    fn shutdown(&self) {
        // Dropping the rayon pool lets its threads drain queued jobs and exit.
        let pool = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if pool.is_some() {
            info!(pool = %self.name, "Worker pool shut down");
        }
    }

    fn is_shutdown(&self) -> bool {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
