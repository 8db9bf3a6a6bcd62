pub mod composite;
pub mod controller;
pub mod metrics;
pub mod pool;
pub mod task;
pub mod wrapped;

pub use composite::PoolTask;
pub use controller::{ControllerCell, RegistryEvent, TaskController, TaskRegistryView};
pub use metrics::ControllerMetrics;
pub use pool::{Executor, FixedPool, PoolProvider, SharedPool, ThreadPerChild, ThreadPerTask, WorkerPool};
pub use task::{run_task, FnTask, ParentDependent, ParentLink, Task, TaskContext, TaskState, WeakTaskState};
pub use taskforge_core::{ControllerConfig, TaskError, TaskId, TaskPriority, TaskResult, TaskStatus};
pub use wrapped::{TaskHandle, TaskSnapshot, WrappedTask};
