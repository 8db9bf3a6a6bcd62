use std::sync::Arc;

use taskforge_core::TaskError;
use tracing::debug;

use super::{Executor, ThreadPerTask, WorkerPool};

/// How a composite task obtains, and later releases, the executor its
/// children run on.
pub trait PoolProvider: Send + Sync {
    /// Get an executor for a batch of `jobs` children. Never called with 0.
    fn acquire(&self, jobs: usize) -> Result<Arc<dyn Executor>, TaskError>;

    /// Give the executor back once every child has settled.
    fn release(&self, executor: Arc<dyn Executor>);
}

/// Creates and owns a bounded pool per batch; always shuts it down afterwards.
#[derive(Debug, Clone)]
pub struct FixedPool {
    threads: usize,
    thread_name_prefix: String,
}

impl FixedPool {
    pub fn new(threads: usize) -> Self {
        Self::named(threads, "taskforge-child")
    }

    pub fn named(threads: usize, thread_name_prefix: impl Into<String>) -> Self {
        Self {
            threads: threads.max(1),
            thread_name_prefix: thread_name_prefix.into(),
        }
    }
}

impl PoolProvider for FixedPool {
    fn acquire(&self, jobs: usize) -> Result<Arc<dyn Executor>, TaskError> {
        // No point starting more threads than there are children.
        let threads = self.threads.min(jobs).max(1);
        let pool = WorkerPool::new(self.thread_name_prefix.clone(), threads)?;
        Ok(Arc::new(pool))
    }

    fn release(&self, executor: Arc<dyn Executor>) {
        executor.shutdown();
    }
}

/// Borrows an executor owned elsewhere, such as the controller's pool.
///
/// Only shuts it down when `auto_shutdown` is set, since siblings may still
/// be using a shared pool.
#[derive(Clone)]
pub struct SharedPool {
    executor: Arc<dyn Executor>,
    auto_shutdown: bool,
}

impl SharedPool {
    pub fn new(executor: Arc<dyn Executor>, auto_shutdown: bool) -> Self {
        Self {
            executor,
            auto_shutdown,
        }
    }
}

impl PoolProvider for SharedPool {
    fn acquire(&self, _jobs: usize) -> Result<Arc<dyn Executor>, TaskError> {
        if self.executor.is_shutdown() {
            return Err(TaskError::PoolShutdown);
        }
        Ok(Arc::clone(&self.executor))
    }

    fn release(&self, executor: Arc<dyn Executor>) {
        if self.auto_shutdown {
            executor.shutdown();
        } else {
            debug!(pool = %executor.name(), "Leaving shared pool running");
        }
    }
}

/// One thread per child, for children that spend most of their time blocked.
#[derive(Debug, Clone)]
pub struct ThreadPerChild {
    thread_name_prefix: String,
}

impl ThreadPerChild {
    pub fn new() -> Self {
        Self::named("taskforge-child")
    }

    pub fn named(thread_name_prefix: impl Into<String>) -> Self {
        Self {
            thread_name_prefix: thread_name_prefix.into(),
        }
    }
}

impl Default for ThreadPerChild {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolProvider for ThreadPerChild {
    fn acquire(&self, _jobs: usize) -> Result<Arc<dyn Executor>, TaskError> {
        Ok(Arc::new(ThreadPerTask::new(self.thread_name_prefix.clone())))
    }

    fn release(&self, executor: Arc<dyn Executor>) {
        executor.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_pool_is_owned_and_shut_down() {
        let provider = FixedPool::new(8);
        let executor = provider.acquire(3).unwrap();
        assert!(!executor.is_shutdown());
        provider.release(Arc::clone(&executor));
        assert!(executor.is_shutdown());
    }

    #[test]
    fn shared_pool_survives_release_without_auto_shutdown() {
        let shared: Arc<dyn Executor> = Arc::new(WorkerPool::new("shared", 1).unwrap());
        let provider = SharedPool::new(Arc::clone(&shared), false);

        let executor = provider.acquire(4).unwrap();
        provider.release(executor);
        assert!(!shared.is_shutdown());
    }

    #[test]
    fn shared_pool_with_auto_shutdown_closes_it() {
        let shared: Arc<dyn Executor> = Arc::new(WorkerPool::new("shared", 1).unwrap());
        let provider = SharedPool::new(Arc::clone(&shared), true);

        let executor = provider.acquire(1).unwrap();
        provider.release(executor);
        assert!(shared.is_shutdown());
        assert!(matches!(provider.acquire(1), Err(TaskError::PoolShutdown)));
    }

    #[test]
    fn thread_per_child_hands_out_fresh_executors() {
        let provider = ThreadPerChild::new();
        let first = provider.acquire(2).unwrap();
        provider.release(Arc::clone(&first));
        let second = provider.acquire(2).unwrap();
        assert!(first.is_shutdown());
        assert!(!second.is_shutdown());
    }
}
