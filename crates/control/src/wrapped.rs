use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use taskforge_core::{TaskId, TaskPriority, TaskStatus};
use tracing::{debug, warn};

use crate::task::Task;

/// Cancel/await handle for one dispatched task.
///
/// Completes when the task body returns or when the handle is canceled,
/// whichever happens first.
#[derive(Clone, Default)]
pub struct TaskHandle {
    inner: Arc<HandleInner>,
}

#[derive(Default)]
struct HandleInner {
    canceled: AtomicBool,
    done: Mutex<bool>,
    completed: Condvar,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the handle canceled. A queued job that sees this skips the body.
    pub fn cancel(&self) {
        self.inner.canceled.store(true, Ordering::Release);
        self.complete();
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        *self.inner.done.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn complete(&self) {
        let mut done = self.inner.done.lock().unwrap_or_else(PoisonError::into_inner);
        *done = true;
        self.inner.completed.notify_all();
    }

    /// Block until the handle completes.
    pub fn wait(&self) {
        let mut done = self.inner.done.lock().unwrap_or_else(PoisonError::into_inner);
        while !*done {
            done = self
                .inner
                .completed
                .wait(done)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the handle completes or `timeout` elapses. Returns true if
    /// it completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let done = self.inner.done.lock().unwrap_or_else(PoisonError::into_inner);
        let (done, _) = self
            .inner
            .completed
            .wait_timeout_while(done, timeout, |done| !*done)
            .unwrap_or_else(PoisonError::into_inner);
        *done
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("canceled", &self.is_canceled())
            .field("done", &self.is_done())
            .finish()
    }
}

/// Scheduler-side envelope: a task, its priority and its execution handle.
///
/// The submitter keeps its own `Arc` to the task; the envelope only tracks it.
pub struct WrappedTask {
    task: Arc<dyn Task>,
    priority: AtomicU8,
    submitted_at: DateTime<Utc>,
    handle: OnceLock<TaskHandle>,
}

impl WrappedTask {
    pub fn new(task: Arc<dyn Task>, priority: TaskPriority) -> Self {
        Self {
            task,
            priority: AtomicU8::new(priority as u8),
            submitted_at: Utc::now(),
            handle: OnceLock::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    pub fn task(&self) -> &Arc<dyn Task> {
        &self.task
    }

    pub fn priority(&self) -> TaskPriority {
        TaskPriority::from_u8(self.priority.load(Ordering::Acquire))
    }

    pub(crate) fn set_priority(&self, priority: TaskPriority) {
        self.priority.store(priority as u8, Ordering::Release);
    }

    /// Mirrors the wrapped task's own status.
    pub fn status(&self) -> TaskStatus {
        self.task.status()
    }

    pub fn description(&self) -> String {
        self.task.description()
    }

    pub fn finished_percentage(&self) -> f64 {
        self.task.finished_percentage()
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// Attach the execution handle. Only the first call has an effect.
    pub(crate) fn attach(&self, handle: TaskHandle) -> bool {
        let attached = self.handle.set(handle).is_ok();
        if !attached {
            warn!(task = %self.id(), "Execution handle already attached, ignoring");
        }
        attached
    }

    pub fn handle(&self) -> Option<&TaskHandle> {
        self.handle.get()
    }

    /// Cancel the task, then its execution handle. Waiters woken by the
    /// handle already see the task's terminal status.
    pub fn cancel(&self) {
        self.task.cancel();
        if let Some(handle) = self.handle.get() {
            handle.cancel();
        }
    }

    /// Block until the task completes or is canceled. Returns at once for an
    /// envelope that was never dispatched.
    pub fn wait(&self) {
        if let Some(handle) = self.handle.get() {
            handle.wait();
        }
    }

    /// Like [`WrappedTask::wait`] with a deadline. Returns true if the task
    /// completed in time.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.handle.get() {
            Some(handle) => handle.wait_timeout(timeout),
            None => self.status().is_terminal(),
        }
    }

    /// Run the task on the current thread unless the handle was canceled,
    /// then complete the handle.
    pub(crate) fn execute(&self) {
        let handle = self.handle.get();
        if handle.is_some_and(TaskHandle::is_canceled) {
            debug!(task = %self.id(), "Execution handle canceled before dispatch, skipping");
        } else {
            self.task.run();
        }
        if let Some(handle) = handle {
            handle.complete();
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.task.state();
        TaskSnapshot {
            id: self.id(),
            description: self.description(),
            status: self.status(),
            priority: self.priority(),
            progress: self.finished_percentage(),
            created_at: state.created_at(),
            started_at: state.started_at(),
            finished_at: state.finished_at(),
            error: state.error_message(),
        }
    }
}

impl fmt::Debug for WrappedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedTask")
            .field("id", &self.id())
            .field("priority", &self.priority())
            .field("status", &self.status())
            .finish()
    }
}

/// Point-in-time view of a tracked task, for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::task::FnTask;

    fn counting_task(calls: &Arc<AtomicUsize>) -> Arc<dyn Task> {
        let calls = Arc::clone(calls);
        Arc::new(FnTask::new("count", move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
    }

    #[test]
    fn handle_can_only_be_attached_once() {
        let wrapped = WrappedTask::new(Arc::new(FnTask::new("x", |_| Ok(()))), TaskPriority::Normal);
        assert!(wrapped.handle().is_none());
        assert!(wrapped.attach(TaskHandle::new()));
        assert!(!wrapped.attach(TaskHandle::new()));
    }

    #[test]
    fn execute_runs_body_and_completes_handle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let wrapped = WrappedTask::new(counting_task(&calls), TaskPriority::High);
        wrapped.attach(TaskHandle::new());

        wrapped.execute();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(wrapped.handle().unwrap().is_done());
        assert_eq!(wrapped.status(), TaskStatus::Finished);
        assert!(wrapped.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn cancel_hits_handle_and_task() {
        let calls = Arc::new(AtomicUsize::new(0));
        let wrapped = WrappedTask::new(counting_task(&calls), TaskPriority::Normal);
        wrapped.attach(TaskHandle::new());

        wrapped.cancel();
        wrapped.execute();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(wrapped.handle().unwrap().is_canceled());
        assert_eq!(wrapped.status(), TaskStatus::Canceled);
    }

    #[test]
    fn task_is_canceled_before_waiters_are_released() {
        let wrapped = Arc::new(WrappedTask::new(
            Arc::new(FnTask::new("Deisotope", |_| Ok(()))),
            TaskPriority::Normal,
        ));
        wrapped.attach(TaskHandle::new());

        let seen = Arc::new(std::sync::Mutex::new(None));
        let sink = Arc::clone(&seen);
        let handle = wrapped.handle().unwrap().clone();
        wrapped.task().state().add_listener(Box::new(move |_, new, _| {
            if new == TaskStatus::Canceled {
                *sink.lock().unwrap() = Some(handle.is_done());
            }
        }));

        let waiter = {
            let wrapped = Arc::clone(&wrapped);
            std::thread::spawn(move || {
                wrapped.wait();
                wrapped.status()
            })
        };
        wrapped.cancel();

        assert_eq!(*seen.lock().unwrap(), Some(false));
        assert_eq!(waiter.join().unwrap(), TaskStatus::Canceled);
    }

    #[test]
    fn wait_returns_after_completion_on_another_thread() {
        let handle = TaskHandle::new();
        let remote = handle.clone();
        let worker = std::thread::spawn(move || remote.complete());
        handle.wait();
        worker.join().unwrap();
        assert!(handle.is_done());
        assert!(!handle.is_canceled());
    }

    #[test]
    fn wait_timeout_expires_on_pending_handle() {
        let handle = TaskHandle::new();
        assert!(!handle.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn snapshot_reflects_task() {
        let wrapped = WrappedTask::new(
            Arc::new(FnTask::new("Align peaks", |_| Err(taskforge_core::TaskError::failed("rt shift")))),
            TaskPriority::High,
        );
        wrapped.attach(TaskHandle::new());
        wrapped.execute();

        let snap = wrapped.snapshot();
        assert_eq!(snap.description, "Align peaks");
        assert_eq!(snap.status, TaskStatus::Error);
        assert_eq!(snap.priority, TaskPriority::High);
        assert_eq!(snap.error.as_deref(), Some("Task failed: rt shift"));
        assert!(snap.started_at.is_some());
    }
}
