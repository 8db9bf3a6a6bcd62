//! Executors that run task bodies, and the policies composite tasks use to
//! obtain them.

mod provider;
mod thread_per_task;
mod worker_pool;

use taskforge_core::TaskError;

pub use provider::{FixedPool, PoolProvider, SharedPool, ThreadPerChild};
pub use thread_per_task::ThreadPerTask;
pub use worker_pool::WorkerPool;

/// A unit of work handed to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs jobs on threads it manages.
pub trait Executor: Send + Sync {
    /// Name used for thread names and logs.
    fn name(&self) -> &str;

    /// Queue `job` for execution. Fails only after [`Executor::shutdown`] or
    /// when a thread cannot be spawned.
    fn execute(&self, job: Job) -> Result<(), TaskError>;

    /// Stop accepting jobs. Jobs already accepted still run to completion.
    fn shutdown(&self);

    fn is_shutdown(&self) -> bool;
}
