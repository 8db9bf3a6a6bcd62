use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use taskforge_core::TaskError;

use super::{Executor, Job};

/// Spawns one OS thread per job. Suited to children that mostly block on I/O.
pub struct ThreadPerTask {
    name: String,
    spawned: AtomicUsize,
    closed: AtomicBool,
}

impl ThreadPerTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spawned: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Threads spawned so far.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }
}

impl Executor for ThreadPerTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, job: Job) -> Result<(), TaskError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TaskError::PoolShutdown);
        }
        let n = self.spawned.fetch_add(1, Ordering::Relaxed);
        thread::Builder::new()
            .name(format!("{}-{}", self.name, n))
            .spawn(job)
            .map(|_| ())
            .map_err(|e| TaskError::Pool(format!("failed to spawn thread: {e}")))
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
