use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use taskforge_core::{ControllerConfig, TaskError, TaskId};
use tracing::info;

use super::dispatch::Dispatcher;
use super::registry::{TaskRegistry, TaskRegistryView};
use crate::metrics::ControllerMetrics;
use crate::pool::{Executor, FixedPool, SharedPool, ThreadPerChild, WorkerPool};
use crate::wrapped::WrappedTask;

/// The task controller. Owns the worker pool, dispatches submitted tasks in
/// priority order and keeps the live registry of every tracked task.
pub struct TaskController {
    pub(super) config: ControllerConfig,
    /// Bounded pool most tasks run on.
    pub(super) pool: Arc<WorkerPool>,
    /// Pending queue, running count and metrics shared with worker jobs.
    pub(super) dispatcher: Dispatcher,
    /// Tasks submitted and not yet terminal.
    pub(super) registry: Arc<TaskRegistry>,
    pub(super) closed: AtomicBool,
}

impl TaskController {
    /// Start a controller with `config.resolved_worker_threads()` workers.
    pub fn new(config: ControllerConfig) -> Result<Self, TaskError> {
        let threads = config.resolved_worker_threads();
        let pool = WorkerPool::new(config.thread_name_prefix.clone(), threads)?;
        info!(workers = threads, prefix = %config.thread_name_prefix, "Task controller started");

        Ok(Self {
            config,
            pool: Arc::new(pool),
            dispatcher: Dispatcher::new(threads),
            registry: Arc::new(TaskRegistry::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Controller with `threads` workers and default naming.
    pub fn with_workers(threads: usize) -> Result<Self, TaskError> {
        Self::new(ControllerConfig {
            worker_threads: threads.max(1),
            ..ControllerConfig::default()
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn worker_threads(&self) -> usize {
        self.pool.threads()
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// The controller's pool as a generic executor.
    pub fn executor(&self) -> Arc<dyn Executor> {
        self.pool.clone()
    }

    /// Provider that lends the controller's pool to a composite task without
    /// letting it shut the pool down.
    ///
    /// The batch's own thread occupies one worker while it waits, so the pool
    /// needs more workers than there are such batches running at once.
    pub fn shared_pool(&self) -> SharedPool {
        SharedPool::new(self.executor(), false)
    }

    /// Provider for a composite task that owns a pool of `threads` workers.
    pub fn child_pool(&self, threads: usize) -> FixedPool {
        FixedPool::named(threads, self.config.child_thread_name_prefix.clone())
    }

    /// Provider for a composite task that gives every child its own thread.
    pub fn thread_per_child(&self) -> ThreadPerChild {
        ThreadPerChild::named(self.config.child_thread_name_prefix.clone())
    }

    /// Read-only, observable view of the live tasks.
    pub fn read_only_tasks(&self) -> TaskRegistryView {
        TaskRegistryView::new(Arc::clone(&self.registry))
    }

    pub fn find(&self, id: TaskId) -> Option<Arc<WrappedTask>> {
        self.registry.get(id)
    }

    /// Tracked tasks that are waiting or processing.
    pub fn active_count(&self) -> usize {
        self.registry
            .tasks()
            .iter()
            .filter(|t| t.status().is_active())
            .count()
    }

    /// Tasks submitted but not yet picked up by a worker.
    pub fn pending_count(&self) -> usize {
        self.dispatcher.queue.len()
    }

    pub fn running_count(&self) -> usize {
        self.dispatcher.running()
    }

    /// Get a snapshot of the current controller metrics.
    pub fn metrics(&self) -> ControllerMetrics {
        self.dispatcher.refresh_load();
        self.dispatcher
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Best-effort cancel of everything outstanding, then release the pool.
    /// Later submissions are canceled on arrival.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Task controller shutdown requested");
        let canceled = self.cancel_all();
        self.pool.shutdown();
        info!(canceled, "Task controller stopped");
    }
}

impl Drop for TaskController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
