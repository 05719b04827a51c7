use super::task::TaskId;

/// Lifecycle of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Waiting,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}


/// How far a cancellation request may reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelKind {
    /// Cancel only if the body has not started yet.
    IfNotStarted,
    /// Also signal the token of a running body.
    Cooperative,
}


/// Failure a worker could not hand back to a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerFault {
    TaskPanicked { task: TaskId, message: String },
    SpawnFailed { task: TaskId, message: String },
}


#[derive(Debug, Clone, Default)]
pub struct PoolMetrics {
    pub live_workers: usize,
    pub idle_workers: usize,
    pub busy_workers: usize,
    pub queued_tasks: usize,
    pub in_flight: usize,
    pub total_submitted: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
}

impl PoolMetrics {
    pub fn utilization(&self) -> f64 {
        if self.live_workers == 0 {
            return 0.0;
        }
        self.busy_workers as f64 / self.live_workers as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed_tasks + self.failed_tasks + self.cancelled_tasks;
        if total == 0 {
            return 1.0;
        }
        self.completed_tasks as f64 / total as f64
    }
}
