//! Task controller -- priority dispatch onto a worker pool plus the live
//! registry of tracked tasks.
//!
//! Split into focused submodules:
//! - `core`: TaskController struct, constructor, accessors and shutdown
//! - `submission`: submit, bulk cancel and reprioritization
//! - `dispatch`: worker jobs that pick the highest-ranked pending task
//! - `queue`: the priority-ordered pending queue
//! - `registry`: live task registry, its read-only view and change events
//! - `cell`: idempotent single-initialization holder

mod cell;
mod core;
mod dispatch;
mod queue;
mod registry;
mod submission;

pub use self::cell::ControllerCell;
pub use self::core::TaskController;
pub use self::registry::{RegistryEvent, TaskRegistryView};
