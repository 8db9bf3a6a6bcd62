use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::queue::PendingQueue;
use crate::metrics::ControllerMetrics;
use crate::pool::Job;

/// State a worker job needs to pick and run the next pending task.
///
/// One job is handed to the pool per submission. Each job runs whichever
/// pending task ranks highest when a worker picks the job up, so the pool's
/// own queue order does not matter.
#[derive(Clone)]
pub(super) struct Dispatcher {
    pub(super) queue: Arc<PendingQueue>,
    pub(super) running: Arc<AtomicUsize>,
    pub(super) metrics: Arc<RwLock<ControllerMetrics>>,
}

/// Decrements the running count even if the task's `run` unwinds.
struct RunningGuard<'a> {
    dispatcher: &'a Dispatcher,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.running.fetch_sub(1, Ordering::AcqRel);
        self.dispatcher.refresh_load();
    }
}

impl Dispatcher {
    pub(super) fn new(worker_threads: usize) -> Self {
        Self {
            queue: Arc::new(PendingQueue::new()),
            running: Arc::new(AtomicUsize::new(0)),
            metrics: Arc::new(RwLock::new(ControllerMetrics::new(worker_threads))),
        }
    }

    pub(super) fn job(&self) -> Job {
        let dispatcher = self.clone();
        Box::new(move || dispatcher.dispatch_next())
    }

    fn dispatch_next(&self) {
        let Some(next) = self.queue.pop() else {
            // Removed from the queue after its job was handed to the pool.
            debug!("No pending task for worker job");
            return;
        };

        self.running.fetch_add(1, Ordering::AcqRel);
        self.refresh_load();
        let _guard = RunningGuard { dispatcher: self };
        debug!(task = %next.id(), priority = %next.priority(), "Dispatching task");
        next.execute();
    }

    pub(super) fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    pub(super) fn refresh_load(&self) {
        let pending = self.queue.pending_by_priority();
        let running = self.running();
        if let Ok(mut m) = self.metrics.write() {
            m.record_load(pending, running);
        }
    }
}
