//! The task contract.
//!
//! A [`Task`] is a cancellable, progress-reporting unit of work. Concrete
//! tasks embed a [`TaskState`] and implement a body in [`Task::process`];
//! [`run_task`] drives the status machine around that body:
//!
//! - `Waiting -> Processing` before the body runs (skipped if canceled first)
//! - `Processing -> Finished` when the body returns `Ok`
//! - `Processing -> Error` on `Err` or panic, with the message kept on the task
//! - `Processing -> Canceled` when the body returns [`TaskError::Canceled`]
//!
//! Cancellation is cooperative: [`Task::cancel`] flips the status and the body
//! is expected to poll [`TaskContext::check_canceled`] at reasonable intervals.

mod fn_task;
mod parent;
mod state;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use taskforge_core::{TaskError, TaskId, TaskStatus};
use tracing::{debug, error, info};

pub use fn_task::FnTask;
pub use parent::{ParentDependent, ParentLink};
pub use state::{StatusListener, TaskState, WeakTaskState};

/// A unit of work the controller can run.
///
/// Implementations provide the state block, a description and a body;
/// everything else has a default built on [`TaskState`].
pub trait Task: Send + Sync {
    fn state(&self) -> &TaskState;

    /// Human-readable description. May be computed on every call.
    fn description(&self) -> String;

    /// Stable name for grouping timings across runs. Tasks whose description
    /// changes while they exist should override this.
    fn kind(&self) -> String {
        self.description()
    }

    /// The task body. Runs at most once, on a worker thread.
    fn process(&self, ctx: &TaskContext<'_>) -> Result<(), TaskError>;

    fn id(&self) -> TaskId {
        self.state().id()
    }

    fn status(&self) -> TaskStatus {
        self.state().status()
    }

    /// Fraction of work done, in `[0.0, 1.0]`. Safe to call while running.
    fn finished_percentage(&self) -> f64 {
        self.state().progress()
    }

    fn error_message(&self) -> Option<String> {
        self.state().error_message()
    }

    /// Idempotent cooperative cancel.
    fn cancel(&self) {
        self.state().cancel();
    }

    /// Execute the body under the status machine. Never panics.
    fn run(&self) {
        run_task(self);
    }
}

/// Body-facing view of a running task.
pub struct TaskContext<'a> {
    state: &'a TaskState,
}

impl<'a> TaskContext<'a> {
    pub fn new(state: &'a TaskState) -> Self {
        Self { state }
    }

    pub fn id(&self) -> TaskId {
        self.state.id()
    }

    pub fn state(&self) -> &TaskState {
        self.state
    }

    pub fn set_progress(&self, fraction: f64) {
        self.state.set_progress(fraction);
    }

    /// Report `done` of `total` units. A zero total counts as complete.
    pub fn set_progress_ratio(&self, done: usize, total: usize) {
        if total == 0 {
            self.state.set_progress(1.0);
        } else {
            self.state.set_progress(done as f64 / total as f64);
        }
    }

    /// True once the task should stop: canceled, or failed from outside.
    pub fn is_canceled(&self) -> bool {
        self.state.status().is_terminal()
    }

    /// `Err(TaskError::Canceled)` once the task should stop, for use with `?`.
    pub fn check_canceled(&self) -> Result<(), TaskError> {
        if self.is_canceled() {
            Err(TaskError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Drive `task` through its status machine. Panics and errors from the body
/// are caught here and turned into `Error`; this never unwinds into the
/// worker thread.
pub fn run_task<T: Task + ?Sized>(task: &T) {
    let state = task.state();
    if !state.start() {
        debug!(
            task = %state.id(),
            status = %state.status(),
            "Skipping task body, task is no longer waiting"
        );
        return;
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let ctx = TaskContext::new(state);
        debug!(task = %state.id(), description = %task.description(), "Task started");
        task.process(&ctx)
    }));

    match outcome {
        Ok(Ok(())) => {
            if state.finish() {
                info!(task = %state.id(), "Task finished");
            }
        }
        Ok(Err(TaskError::Canceled)) => {
            state.cancel();
            debug!(task = %state.id(), "Task body stopped after cancellation");
        }
        Ok(Err(e)) => {
            if state.fail(e.to_string()) {
                error!(task = %state.id(), error = %e, "Task failed");
            } else {
                debug!(task = %state.id(), error = %e, "Ignoring error from a task that already ended");
            }
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            if state.fail(TaskError::Panicked(message.clone()).to_string()) {
                error!(task = %state.id(), panic = %message, "Task panicked");
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
