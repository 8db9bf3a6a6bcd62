use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    /// The task body gave up with a message.
    #[error("Task failed: {0}")]
    Failed(String),

    /// The task body noticed a cancellation request and stopped early.
    #[error("Task canceled")]
    Canceled,

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Child task '{child}' failed: {reason}")]
    ChildFailed { child: String, reason: String },

    #[error("Worker pool has been shut down")]
    PoolShutdown,

    #[error("Worker pool error: {0}")]
    Pool(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}

impl TaskError {
    /// Shorthand for [`TaskError::Failed`].
    pub fn failed(msg: impl Into<String>) -> Self {
        TaskError::Failed(msg.into())
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskError::Canceled)
    }
}

pub type TaskResult<T = ()> = Result<T, TaskError>;
