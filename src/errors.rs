/// Failure stored in a task's result slot.
///
/// Cloned out to every reader of a finished task, so payloads are plain strings.
#[derive(thiserror::Error, Debug, PartialEq, Eq, Clone)]
pub enum TaskError {
    /// The body or a continuation returned an error.
    #[error("task failed: {0}")]
    Failed(String),

    /// The body or a continuation panicked; the panic was caught.
    #[error("task panicked: {0}")]
    Panic(String),

    /// The task observed a cancellation request.
    #[error("task cancelled")]
    Cancelled,

    /// The executor could not hand the task to a worker.
    #[error("task rejected: {0}")]
    Rejected(String),
}

impl TaskError {
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        TaskError::Failed(reason.to_string())
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

/// Errors reported synchronously by the executor API.
#[derive(thiserror::Error, Debug, PartialEq, Eq, Clone)]
pub enum ExecutorError {
    #[error("pool max size must be more than 0")]
    InvalidPoolSize,

    #[error("worker idle lifetime must be more than 0")]
    InvalidIdleLifetime,

    #[error("timer interval must be more than 0")]
    InvalidInterval,

    /// `then` was called after the task started running.
    #[error("task {0} has already started")]
    AlreadyStarted(crate::task::TaskId),

    #[error("cancellation source is already cancelled")]
    AlreadyCancelled,

    #[error("executor is shut down")]
    ShutDown,

    #[error("failed to spawn thread: {0}")]
    Spawn(String),
}
