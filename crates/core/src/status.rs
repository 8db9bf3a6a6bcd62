use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TaskId = Uuid;

/// Lifecycle status of a task.
///
/// `Waiting -> Processing -> {Finished, Error, Canceled}`, plus
/// `Waiting -> Canceled` for tasks canceled before they ever ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TaskStatus {
    /// Enqueued, not started yet.
    Waiting = 0,
    /// Body is executing.
    Processing = 1,
    Finished = 2,
    Error = 3,
    Canceled = 4,
}

impl TaskStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Waiting, Processing)
                | (Waiting, Canceled)
                | (Processing, Finished)
                | (Processing, Error)
                | (Processing, Canceled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Canceled)
    }

    /// Waiting or processing.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Inverse of `self as u8`. Unknown values map to `Error`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Waiting,
            1 => Self::Processing,
            2 => Self::Finished,
            4 => Self::Canceled,
            _ => Self::Error,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Processing => "processing",
            Self::Finished => "finished",
            Self::Error => "error",
            Self::Canceled => "canceled",
        };
        write!(f, "{s}")
    }
}

/// Scheduling hint. Only affects queue order, never preempts running work.
///
/// Ordered so that `High > Normal`; the pending queue is a max-heap.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TaskPriority {
    #[default]
    Normal = 0,
    High = 1,
}

impl TaskPriority {
    pub fn from_u8(value: u8) -> Self {
        if value == Self::High as u8 {
            Self::High
        } else {
            Self::Normal
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Normal => write!(f, "NORMAL"),
            TaskPriority::High => write!(f, "HIGH"),
        }
    }
}
