use super::{
    errors::{ExecutorError, TaskError},
    model::{CancelKind, TaskStatus},
    result::TaskResult,
    task::{Task, TaskId},
};
use std::time::Duration;
use futures::future::join_all;


/// Handle on a submitted task.
///
/// Blocking accessors take an optional timeout; `None` waits indefinitely.
/// A timeout is reported as "not ready yet", never as an error.
#[derive(Debug)]
pub struct Future<T> {
    task: Task<T>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self { task: self.task.clone() }
    }
}

impl<T> Future<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn new(task: Task<T>) -> Self {
        Self { task }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    #[inline]
    pub fn task(&self) -> &Task<T> {
        &self.task
    }

    #[inline]
    pub fn completed(&self) -> bool {
        self.task.is_completed()
    }

    #[inline]
    pub fn status(&self) -> TaskStatus {
        self.task.status()
    }

    /// Appends a continuation; fails once the task has started.
    pub fn then<F>(&self, f: F) -> Result<&Self, ExecutorError>
    where
        F: FnOnce(T) -> TaskResult<T> + Send + 'static,
    {
        self.task.then(f).map(|_| self)
    }

    /// Waits for the result. `None` means the wait timed out first.
    pub fn get_safe(&self, timeout: Option<Duration>) -> Option<TaskResult<T>> {
        if self.task.wait(timeout) {
            self.task.result()
        } else {
            None
        }
    }

    /// Like [`get_safe`](Self::get_safe), but the task's error becomes the `Err`.
    /// `Ok(None)` means the wait timed out first.
    pub fn get(&self, timeout: Option<Duration>) -> Result<Option<T>, TaskError> {
        self.get_safe(timeout).transpose()
    }

    /// Requests cancellation, then waits up to `wait` for the terminal outcome.
    ///
    /// With `wait = None` returns immediately with whatever is already known.
    pub fn cancel(&self, kind: CancelKind, wait: Option<Duration>) -> Option<TaskResult<T>> {
        self.task.cancel(kind);
        match wait {
            Some(timeout) => self.get_safe(Some(timeout)),
            None => self.task.result(),
        }
    }

    pub async fn get_async(&self) -> TaskResult<T> {
        self.task.finished().await
    }

    pub async fn get_async_timeout(&self, timeout: Duration) -> Option<TaskResult<T>> {
        tokio::time::timeout(timeout, self.task.finished()).await.ok()
    }
}

/// Awaits every future; results keep the input order.
pub async fn join_all_async<T>(futures: &[Future<T>]) -> Vec<TaskResult<T>>
where
    T: Clone + Send + 'static,
{
    join_all(futures.iter().map(|future| future.get_async())).await
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn spawn_runner<T: Clone + Send + 'static>(future: &Future<T>, delay: Duration) -> thread::JoinHandle<()> {
        let task = future.task().clone();
        thread::spawn(move || {
            thread::sleep(delay);
            let _ = task.get_safe();
        })
    }

    #[test]
    fn get_reports_not_ready_then_value() {
        let future = Future::new(Task::new(|| Ok(3)));
        assert_eq!(future.get(Some(Duration::from_millis(10))), Ok(None));
        assert!(!future.completed());

        let runner = spawn_runner(&future, Duration::from_millis(20));
        assert_eq!(future.get(None), Ok(Some(3)));
        assert!(future.completed());
        runner.join().unwrap();
    }

    #[test]
    fn get_propagates_stored_error() {
        let future: Future<u8> = Future::new(Task::new(|| Err(TaskError::failed("nope"))));
        future.task().get_safe().unwrap_err();
        assert_eq!(future.get(None), Err(TaskError::Failed("nope".into())));
        assert_eq!(future.get_safe(None), Some(Err(TaskError::Failed("nope".into()))));
        assert_eq!(future.status(), TaskStatus::Failed);
    }

    #[test]
    fn cancel_pending_resolves_immediately() {
        let future = Future::new(Task::new(|| Ok(1)));
        assert_eq!(future.cancel(CancelKind::IfNotStarted, None), Some(Err(TaskError::Cancelled)));
        assert_eq!(future.get(Some(Duration::from_millis(1))), Err(TaskError::Cancelled));
    }

    #[tokio::test]
    async fn async_accessors() {
        let future = Future::new(Task::new(|| Ok(5)));
        assert_eq!(future.get_async_timeout(Duration::from_millis(10)).await, None);

        let runner = spawn_runner(&future, Duration::from_millis(10));
        assert_eq!(future.get_async().await, Ok(5));
        runner.join().unwrap();

        let futures: Vec<_> = (0..4).map(|i| Future::new(Task::new(move || Ok(i)))).collect();
        let runners: Vec<_> = futures.iter().map(|f| spawn_runner(f, Duration::ZERO)).collect();
        assert_eq!(join_all_async(&futures).await, vec![Ok(0), Ok(1), Ok(2), Ok(3)]);
        for r in runners {
            r.join().unwrap();
        }
    }
}
