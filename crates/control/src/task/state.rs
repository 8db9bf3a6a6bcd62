use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use chrono::{DateTime, Utc};
use taskforge_core::{TaskId, TaskStatus};
use tracing::{debug, error};
use uuid::Uuid;

use super::panic_message;

/// Callback fired on every status transition with `(task, new, previous)`.
///
/// Listeners run synchronously on the transitioning thread while the task's
/// transition lock is held, so they must not register further listeners on
/// the same task. Reading the task's status, progress or error is fine.
pub type StatusListener = Box<dyn Fn(&TaskState, TaskStatus, TaskStatus) + Send + Sync>;

/// Status, progress and listener bookkeeping shared by every task kind.
///
/// Cheap to clone; clones refer to the same task.
#[derive(Clone)]
pub struct TaskState {
    inner: Arc<StateInner>,
}

/// Non-owning reference to a [`TaskState`].
#[derive(Clone, Default)]
pub struct WeakTaskState {
    inner: Weak<StateInner>,
}

struct StateInner {
    id: TaskId,
    created_at: DateTime<Utc>,
    started_at: OnceLock<DateTime<Utc>>,
    finished_at: OnceLock<DateTime<Utc>>,
    status: AtomicU8,
    /// f64 bits. Only non-negative values are stored, whose bit patterns
    /// order the same way as the floats, so `fetch_max` keeps it monotonic.
    progress: AtomicU64,
    /// Progress captured at the terminal transition.
    final_progress: AtomicU64,
    error: Mutex<Option<String>>,
    /// Transition lock. Guards status writes and listener fan-out.
    listeners: Mutex<Vec<StatusListener>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TaskState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StateInner {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                started_at: OnceLock::new(),
                finished_at: OnceLock::new(),
                status: AtomicU8::new(TaskStatus::Waiting as u8),
                progress: AtomicU64::new(0f64.to_bits()),
                final_progress: AtomicU64::new(0f64.to_bits()),
                error: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// When the task entered `Processing`, if it ever did.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.started_at.get().copied()
    }

    /// When the task reached a terminal status.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.inner.finished_at.get().copied()
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.inner.status.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.status().is_active()
    }

    pub fn is_canceled(&self) -> bool {
        self.status() == TaskStatus::Canceled
    }

    /// Fraction of work done, in `[0.0, 1.0]`. Fixed once the task is terminal.
    pub fn progress(&self) -> f64 {
        if self.status().is_terminal() {
            f64::from_bits(self.inner.final_progress.load(Ordering::Acquire))
        } else {
            f64::from_bits(self.inner.progress.load(Ordering::Acquire))
        }
    }

    /// Report progress. Values are clamped to `[0.0, 1.0]`, never move
    /// backwards, and are ignored once the task is terminal.
    pub fn set_progress(&self, fraction: f64) {
        if fraction.is_nan() || self.status().is_terminal() {
            return;
        }
        let clamped = fraction.clamp(0.0, 1.0);
        // Also rejects -0.0, whose sign bit would win fetch_max.
        if clamped <= 0.0 {
            return;
        }
        self.inner
            .progress
            .fetch_max(clamped.to_bits(), Ordering::AcqRel);
    }

    /// Message recorded when the task ended in `Error`.
    pub fn error_message(&self) -> Option<String> {
        lock(&self.inner.error).clone()
    }

    /// Register a listener and return the status at registration time.
    ///
    /// Registration and the status read happen under the transition lock, so
    /// the listener sees every transition after the returned status.
    pub fn observe(&self, listener: StatusListener) -> TaskStatus {
        let mut listeners = lock(&self.inner.listeners);
        listeners.push(listener);
        self.status()
    }

    /// Register a listener, discarding the current status.
    pub fn add_listener(&self, listener: StatusListener) {
        self.observe(listener);
    }

    /// `Waiting -> Processing`. Returns false if the task was already started,
    /// canceled or otherwise terminal.
    pub fn start(&self) -> bool {
        self.transition(TaskStatus::Processing, None)
    }

    /// `Processing -> Finished`.
    pub fn finish(&self) -> bool {
        self.transition(TaskStatus::Finished, None)
    }

    /// `Processing -> Error`, recording `message`.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.transition(TaskStatus::Error, Some(message.into()))
    }

    /// Idempotent. Moves a waiting or processing task to `Canceled`; a no-op
    /// on terminal tasks. Returns true if this call did the transition.
    pub fn cancel(&self) -> bool {
        let canceled = self.transition(TaskStatus::Canceled, None);
        if canceled {
            debug!(task = %self.id(), "Task canceled");
        }
        canceled
    }

    pub fn downgrade(&self) -> WeakTaskState {
        WeakTaskState {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn transition(&self, target: TaskStatus, error: Option<String>) -> bool {
        let listeners = lock(&self.inner.listeners);
        let previous = self.status();
        if !previous.can_transition_to(target) {
            return false;
        }

        if let Some(message) = error {
            *lock(&self.inner.error) = Some(message);
        }

        let now = Utc::now();
        if target == TaskStatus::Processing {
            let _ = self.inner.started_at.set(now);
        }
        if target.is_terminal() {
            let _ = self.inner.finished_at.set(now);
            let reached = self.inner.progress.load(Ordering::Acquire);
            self.inner.final_progress.store(reached, Ordering::Release);
        }
        self.inner.status.store(target as u8, Ordering::Release);

        for listener in listeners.iter() {
            let notified = panic::catch_unwind(AssertUnwindSafe(|| listener(self, target, previous)));
            if let Err(panic) = notified {
                error!(
                    task = %self.id(),
                    from = %previous,
                    to = %target,
                    "Status listener panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }
        true
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskState")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("progress", &self.progress())
            .finish()
    }
}

impl WeakTaskState {
    pub fn upgrade(&self) -> Option<TaskState> {
        self.inner.upgrade().map(|inner| TaskState { inner })
    }
}

impl fmt::Debug for WeakTaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(state) => write!(f, "WeakTaskState({})", state.id()),
            None => write!(f, "WeakTaskState(dropped)"),
        }
    }
}
