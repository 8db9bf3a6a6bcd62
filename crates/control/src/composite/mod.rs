//! Composite "pool as a task".
//!
//! A [`PoolTask`] runs a batch of child tasks on an executor obtained from a
//! [`PoolProvider`] and derives its own status and progress from theirs:
//!
//! - progress is `settled children / total children`
//! - any child ending in `Error` cancels the rest, then fails the batch
//! - a child ending in `Canceled` cancels the rest, then cancels the batch
//! - the batch ending for any other reason cancels every unsettled child
//! - the batch finishes only when every child finished
//!
//! Child outcomes never move the batch's status directly. The batch body
//! winds its children down, releases the pool and returns the outcome, so
//! the batch is terminal only after its children are. An external cancel of
//! the batch lands on its status at once and wins over any child error the
//! body has not yet returned.

mod monitor;

use std::sync::Arc;

use taskforge_core::{TaskError, TaskPriority, TaskStatus};
use tracing::{debug, info, warn};

use self::monitor::{BatchMonitor, ChildOutcome};
use crate::pool::{Executor, FixedPool, PoolProvider, SharedPool, ThreadPerChild};
use crate::task::{StatusListener, Task, TaskContext, TaskState, WeakTaskState};
use crate::wrapped::{TaskHandle, WrappedTask};

/// A task whose body runs a batch of child tasks to completion.
pub struct PoolTask {
    state: TaskState,
    description: String,
    children: Vec<Arc<dyn Task>>,
    provider: Box<dyn PoolProvider>,
    monitor: Arc<BatchMonitor>,
}

impl PoolTask {
    pub fn new(
        description: impl Into<String>,
        children: Vec<Arc<dyn Task>>,
        provider: impl PoolProvider + 'static,
    ) -> Self {
        let monitor = Arc::new(BatchMonitor::new(children.len()));
        let state = TaskState::new();
        state.add_listener(batch_listener(Arc::clone(&monitor), children.clone()));
        Self {
            state,
            description: description.into(),
            children,
            provider: Box::new(provider),
            monitor,
        }
    }

    /// Children run on a pool of at most `threads` workers that the batch
    /// creates and shuts down itself.
    pub fn fixed(description: impl Into<String>, children: Vec<Arc<dyn Task>>, threads: usize) -> Self {
        Self::new(description, children, FixedPool::new(threads))
    }

    /// Children run on a borrowed executor. It is shut down afterwards only
    /// when `auto_shutdown` is set.
    pub fn with_executor(
        description: impl Into<String>,
        children: Vec<Arc<dyn Task>>,
        executor: Arc<dyn Executor>,
        auto_shutdown: bool,
    ) -> Self {
        Self::new(description, children, SharedPool::new(executor, auto_shutdown))
    }

    /// Every child gets its own thread.
    pub fn thread_per_task(description: impl Into<String>, children: Vec<Arc<dyn Task>>) -> Self {
        Self::new(description, children, ThreadPerChild::new())
    }

    pub fn children(&self) -> &[Arc<dyn Task>] {
        &self.children
    }

    /// Children that reached a terminal status so far.
    pub fn finished_children(&self) -> usize {
        self.monitor.settled()
    }

    fn cancel_unsettled(&self) -> usize {
        cancel_active(&self.children)
    }

    /// Terminal status the batch should take from its children's outcomes.
    fn batch_outcome(&self) -> Result<(), TaskError> {
        match self.monitor.stopped_by() {
            Some(ChildOutcome::Failed { child, reason }) => Err(TaskError::ChildFailed { child, reason }),
            Some(ChildOutcome::Canceled { .. }) => Err(TaskError::Canceled),
            None if self.children.iter().all(|c| c.status() == TaskStatus::Finished) => Ok(()),
            None => Err(TaskError::Canceled),
        }
    }
}

fn cancel_active(children: &[Arc<dyn Task>]) -> usize {
    let mut canceled = 0;
    for child in children.iter().filter(|c| c.status().is_active()) {
        child.cancel();
        canceled += 1;
    }
    canceled
}

/// Wakes the batch thread once the batch ends and cancels whatever is still
/// running below it. Runs under the batch's transition lock, which is only
/// ever taken before a child's.
fn batch_listener(monitor: Arc<BatchMonitor>, children: Vec<Arc<dyn Task>>) -> StatusListener {
    Box::new(move |batch, new, _| {
        if !new.is_terminal() {
            return;
        }
        monitor.parent_done();
        let canceled = cancel_active(&children);
        if canceled > 0 {
            debug!(batch = %batch.id(), status = %new, canceled, "Batch ended, canceled unsettled children");
        }
    })
}

/// Apply one child's terminal status to the batch.
fn settle_child(
    monitor: &BatchMonitor,
    parent: &WeakTaskState,
    child_label: &str,
    child: &TaskState,
    status: TaskStatus,
) {
    let parent = parent.upgrade();
    // Progress lands before the batch's waiter can wake and freeze it.
    monitor.child_settled(|settled| {
        if let Some(parent) = &parent {
            parent.set_progress(settled as f64 / monitor.total() as f64);
        }
    });

    let outcome = match status {
        TaskStatus::Error => ChildOutcome::Failed {
            child: child_label.to_string(),
            reason: child.error_message().unwrap_or_else(|| "unknown error".to_string()),
        },
        TaskStatus::Canceled => ChildOutcome::Canceled {
            child: child_label.to_string(),
        },
        _ => return,
    };
    let failed = matches!(outcome, ChildOutcome::Failed { .. });
    if monitor.stop(outcome) {
        let batch = parent.map(|p| p.id());
        if failed {
            warn!(batch = ?batch, child = %child.id(), "Child task failed, stopping batch");
        } else {
            debug!(batch = ?batch, child = %child.id(), "Child task canceled, stopping batch");
        }
    }
}

fn child_listener(monitor: Arc<BatchMonitor>, parent: WeakTaskState, child_label: String) -> StatusListener {
    Box::new(move |child, new, _| {
        if new.is_terminal() {
            settle_child(&monitor, &parent, &child_label, child, new);
        }
    })
}

impl Task for PoolTask {
    fn state(&self) -> &TaskState {
        &self.state
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn process(&self, ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        let total = self.children.len();
        if total == 0 {
            ctx.set_progress(1.0);
            debug!(batch = %ctx.id(), "Empty batch, nothing to run");
            return Ok(());
        }

        let executor = match self.provider.acquire(total) {
            Ok(executor) => executor,
            Err(e) => {
                self.cancel_unsettled();
                return Err(e);
            }
        };
        info!(batch = %ctx.id(), children = total, pool = %executor.name(), "Dispatching batch");

        // Listeners go on before dispatch so no child outcome is missed.
        let parent = self.state.downgrade();
        for child in &self.children {
            let label = child.description();
            let listener = child_listener(Arc::clone(&self.monitor), parent.clone(), label.clone());
            let status = child.state().observe(listener);
            if status.is_terminal() {
                settle_child(&self.monitor, &parent, &label, child.state(), status);
            }
        }

        let wrapped: Vec<Arc<WrappedTask>> = self
            .children
            .iter()
            .map(|child| Arc::new(WrappedTask::new(Arc::clone(child), TaskPriority::Normal)))
            .collect();
        for child in &wrapped {
            child.attach(TaskHandle::new());
        }
        for child in &wrapped {
            if ctx.is_canceled() || self.monitor.stopped_by().is_some() {
                break;
            }
            let job = Arc::clone(child);
            if let Err(e) = executor.execute(Box::new(move || job.execute())) {
                warn!(batch = %ctx.id(), child = %child.id(), error = %e, "Could not dispatch child task");
                child.cancel();
            }
        }

        if !self.monitor.wait() {
            let unsettled = wrapped
                .iter()
                .filter(|c| !c.handle().is_some_and(TaskHandle::is_done))
                .inspect(|c| c.cancel())
                .count();
            debug!(batch = %ctx.id(), unsettled, "Batch stopped early, canceled unsettled children");
        }

        self.provider.release(executor);
        self.batch_outcome()
    }
}
