use std::sync::{Arc, Weak};

use taskforge_core::{TaskId, TaskPriority, TaskStatus};
use tracing::{debug, info, warn};

use super::dispatch::Dispatcher;
use super::registry::TaskRegistry;
use super::TaskController;
use crate::pool::Executor;
use crate::task::{StatusListener, Task};
use crate::wrapped::{TaskHandle, WrappedTask};

impl TaskController {
    /// Track `task` and queue it for a worker. HIGH tasks are picked up ahead
    /// of pending NORMAL ones; nothing already running is preempted.
    ///
    /// Never fails. After shutdown the task is canceled instead of queued.
    /// Submitting a task that is already tracked returns its existing
    /// envelope.
    pub fn submit(&self, task: Arc<dyn Task>, priority: TaskPriority) -> Arc<WrappedTask> {
        let wrapped = Arc::new(WrappedTask::new(task, priority));
        let handle = TaskHandle::new();
        wrapped.attach(handle.clone());

        if let Err(existing) = self.registry.insert(Arc::clone(&wrapped)) {
            warn!(task = %existing.id(), "Task already submitted, keeping its first submission");
            return existing;
        }
        if let Ok(mut m) = self.dispatcher.metrics.write() {
            m.record_submitted();
        }

        let listener = terminal_listener(Arc::downgrade(&self.registry), self.dispatcher.clone(), handle);
        let status = wrapped.task().state().observe(listener);
        if status.is_terminal() {
            // Ended before it was ever tracked; it never reaches the queue.
            debug!(task = %wrapped.id(), status = %status, "Submitted task is already terminal");
            settle(&self.registry, &self.dispatcher, &wrapped, status);
            wrapped.cancel();
            return wrapped;
        }

        self.dispatcher.queue.push(Arc::clone(&wrapped));
        debug!(task = %wrapped.id(), priority = %priority, "Task submitted");

        if let Err(e) = self.pool.execute(self.dispatcher.job()) {
            warn!(task = %wrapped.id(), error = %e, "Worker pool rejected task, canceling it");
            self.dispatcher.queue.remove(wrapped.id());
            wrapped.cancel();
        }
        self.dispatcher.refresh_load();
        wrapped
    }

    /// Submit several tasks with one priority, in order.
    pub fn submit_all(
        &self,
        tasks: impl IntoIterator<Item = Arc<dyn Task>>,
        priority: TaskPriority,
    ) -> Vec<Arc<WrappedTask>> {
        tasks.into_iter().map(|t| self.submit(t, priority)).collect()
    }

    /// Cancel every tracked task. Returns how many were still active.
    pub fn cancel_all(&self) -> usize {
        self.cancel_batch(|_| true)
    }

    /// Cancel the tracked tasks matching `predicate`. Returns how many of
    /// them were still active.
    ///
    /// Works on a copy of the registry, so tasks finishing concurrently are
    /// simply skipped.
    pub fn cancel_batch(&self, predicate: impl Fn(&WrappedTask) -> bool) -> usize {
        let mut canceled = 0;
        for task in self.registry.tasks() {
            if task.status().is_active() && predicate(&task) {
                task.cancel();
                canceled += 1;
            }
        }
        if canceled > 0 {
            info!(canceled, "Canceled tracked tasks");
        }
        canceled
    }

    /// Change the priority of a task still waiting for a worker. Returns false
    /// if it is unknown or already running.
    pub fn set_priority(&self, id: TaskId, priority: TaskPriority) -> bool {
        let moved = self.dispatcher.queue.reprioritize(id, priority);
        if moved {
            debug!(task = %id, priority = %priority, "Task priority changed");
            self.dispatcher.refresh_load();
        }
        moved
    }

    /// True if some waiting or processing task matches `predicate`.
    pub fn is_running_or_queued(&self, predicate: impl Fn(&dyn Task) -> bool) -> bool {
        self.registry
            .tasks()
            .iter()
            .any(|t| t.status().is_active() && predicate(t.task().as_ref()))
    }
}

/// Remove a terminal task from the registry and count it.
fn settle(registry: &TaskRegistry, dispatcher: &Dispatcher, wrapped: &WrappedTask, status: TaskStatus) {
    registry.remove(wrapped.id());
    dispatcher.queue.remove(wrapped.id());

    let state = wrapped.task().state();
    let duration = match (state.started_at(), state.finished_at()) {
        (Some(start), Some(end)) => (end - start).to_std().ok(),
        _ => None,
    };
    if let Ok(mut m) = dispatcher.metrics.write() {
        m.record_terminal(status, &wrapped.task().kind(), duration);
    }
}

fn terminal_listener(registry: Weak<TaskRegistry>, dispatcher: Dispatcher, handle: TaskHandle) -> StatusListener {
    Box::new(move |state, new, previous| {
        if !new.is_terminal() {
            return;
        }
        // Canceled before a worker got to it: waiters need not wait for the job.
        if previous == TaskStatus::Waiting {
            handle.complete();
        }
        let Some(registry) = registry.upgrade() else {
            return;
        };
        if let Some(wrapped) = registry.get(state.id()) {
            settle(&registry, &dispatcher, &wrapped, new);
        }
    })
}
