use super::{
    cancel::{CancellationToken, CancellationTokenSource},
    errors::{ExecutorError, TaskError},
    model::{CancelKind, TaskStatus},
    result::{panic_message, TaskResult},
};
use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use parking_lot::{Condvar, Mutex};
use tokio::sync::watch;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}


type Body<T> = Box<dyn FnOnce(&CancellationToken) -> TaskResult<T> + Send + 'static>;
type Continuation<T> = Box<dyn FnOnce(T) -> TaskResult<T> + Send + 'static>;

enum Stage<T> {
    Pending {
        body: Body<T>,
        chain: Vec<Continuation<T>>,
    },
    Running,
    Finished(TaskResult<T>),
}

impl<T> Stage<T> {
    #[inline]
    fn is_finished(&self) -> bool {
        matches!(self, Stage::Finished(_))
    }

    fn status(&self) -> TaskStatus {
        match self {
            Stage::Pending { .. } => TaskStatus::Waiting,
            Stage::Running => TaskStatus::Running,
            Stage::Finished(Ok(_)) => TaskStatus::Completed,
            Stage::Finished(Err(TaskError::Cancelled)) => TaskStatus::Cancelled,
            Stage::Finished(Err(_)) => TaskStatus::Failed,
        }
    }
}

struct Shared<T> {
    id: TaskId,
    stage: Mutex<Stage<T>>,
    completed: Condvar,
    done: watch::Sender<bool>,
    cancel: CancellationTokenSource,
}


/// Deferred, memoizing unit of work.
///
/// The body and its continuations run at most once. Whoever reaches a pending
/// task first (a worker or a caller of [`get_safe`](Self::get_safe)) runs it;
/// everyone else waits for and reads the cached result.
pub struct Task<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.shared.id)
            .field("status", &self.shared.stage.lock().status())
            .finish()
    }
}

impl<T> Task<T>
where
    T: Clone + Send + 'static,
{
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce() -> TaskResult<T> + Send + 'static,
    {
        Self::build(CancellationTokenSource::new(), Box::new(move |_| body()))
    }

    /// Task whose body polls its own cancellation token.
    pub fn cancellable<F>(body: F) -> Self
    where
        F: FnOnce(&CancellationToken) -> TaskResult<T> + Send + 'static,
    {
        Self::build(CancellationTokenSource::new(), Box::new(body))
    }

    /// Task that is also cancelled when `token`'s source is.
    pub fn with_token<F>(token: &CancellationToken, body: F) -> Self
    where
        F: FnOnce(&CancellationToken) -> TaskResult<T> + Send + 'static,
    {
        Self::build(token.child_source(), Box::new(body))
    }

    fn build(cancel: CancellationTokenSource, body: Body<T>) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                id: TaskId::next(),
                stage: Mutex::new(Stage::Pending { body, chain: Vec::new() }),
                completed: Condvar::new(),
                done,
                cancel,
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    #[inline]
    pub fn token(&self) -> CancellationToken {
        self.shared.cancel.new_token()
    }

    pub fn status(&self) -> TaskStatus {
        self.shared.stage.lock().status()
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.shared.stage.lock().is_finished()
    }

    /// Appends a continuation fed with the previous stage's value.
    ///
    /// Continuations run in registration order; the first error skips the rest.
    pub fn then<F>(&self, f: F) -> Result<&Self, ExecutorError>
    where
        F: FnOnce(T) -> TaskResult<T> + Send + 'static,
    {
        let mut stage = self.shared.stage.lock();
        match &mut *stage {
            Stage::Pending { chain, .. } => {
                chain.push(Box::new(f));
                Ok(self)
            }
            _ => Err(ExecutorError::AlreadyStarted(self.shared.id)),
        }
    }

    /// Runs the task on the calling thread if nobody has started it yet,
    /// otherwise waits for the running execution. Never panics.
    pub fn get_safe(&self) -> TaskResult<T> {
        self.invoke()
    }

    /// Cached result, if the task has finished.
    pub fn result(&self) -> Option<TaskResult<T>> {
        match &*self.shared.stage.lock() {
            Stage::Finished(result) => Some(result.clone()),
            _ => None,
        }
    }

    /// Blocks until the task finishes or `timeout` elapses; does not run it.
    ///
    /// Returns whether the task has finished.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut stage = self.shared.stage.lock();
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        while !stage.is_finished() {
            match deadline {
                Some(deadline) => {
                    if self.shared.completed.wait_until(&mut stage, deadline).timed_out() {
                        return stage.is_finished();
                    }
                }
                None => self.shared.completed.wait(&mut stage),
            }
        }
        true
    }

    /// Resolves once the task has finished; does not run it.
    pub async fn finished(&self) -> TaskResult<T> {
        let mut done = self.shared.done.subscribe();
        loop {
            if let Some(result) = self.result() {
                return result;
            }
            if done.changed().await.is_err() {
                return Err(TaskError::Rejected("completion channel closed".into()));
            }
        }
    }

    /// Requests cancellation. Returns whether the request reached the task.
    ///
    /// A pending task finishes as [`TaskError::Cancelled`] right away. A running
    /// one only sees its token flip, and only for [`CancelKind::Cooperative`].
    pub fn cancel(&self, kind: CancelKind) -> bool {
        let mut stage = self.shared.stage.lock();
        match stage.status() {
            TaskStatus::Waiting => {
                *stage = Stage::Finished(Err(TaskError::Cancelled));
                drop(stage);
                self.shared.cancel.cancel();
                self.notify_finished();
                true
            }
            TaskStatus::Running if kind == CancelKind::Cooperative => {
                drop(stage);
                self.shared.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub(crate) fn invoke(&self) -> TaskResult<T> {
        let (body, chain) = {
            let mut stage = self.shared.stage.lock();
            loop {
                match std::mem::replace(&mut *stage, Stage::Running) {
                    Stage::Pending { body, chain } => break (body, chain),
                    Stage::Running => self.shared.completed.wait(&mut stage),
                    Stage::Finished(result) => {
                        *stage = Stage::Finished(result.clone());
                        return result;
                    }
                }
            }
        };

        let result = self.execute(body, chain);
        self.finish(result)
    }

    fn execute(&self, body: Body<T>, chain: Vec<Continuation<T>>) -> TaskResult<T> {
        let token = self.shared.cancel.new_token();
        token.check()?;

        let value = guarded(|| body(&token))?;
        chain
            .into_iter()
            .try_fold(value, |value, next| guarded(move || next(value)))
    }

    fn finish(&self, result: TaskResult<T>) -> TaskResult<T> {
        *self.shared.stage.lock() = Stage::Finished(result.clone());
        self.notify_finished();
        result
    }

    /// Finishes a task that never started with `reason`.
    pub(crate) fn reject(&self, reason: TaskError) {
        let mut stage = self.shared.stage.lock();
        if matches!(*stage, Stage::Pending { .. }) {
            *stage = Stage::Finished(Err(reason));
            drop(stage);
            self.notify_finished();
        }
    }

    fn notify_finished(&self) {
        self.shared.completed.notify_all();
        self.shared.done.send_replace(true);
    }
}

fn guarded<T>(f: impl FnOnce() -> TaskResult<T>) -> TaskResult<T> {
    catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(TaskError::Panic(panic_message(payload.as_ref()))))
}


/// Type-erased task as seen by the dispatcher and workers.
pub(crate) trait Job: Send {
    fn id(&self) -> TaskId;

    /// Runs (or waits for) the task and reports its outcome without the value.
    fn run(&self) -> Result<(), TaskError>;

    fn reject(&self, reason: TaskError);
}

impl<T> Job for Task<T>
where
    T: Clone + Send + 'static,
{
    fn id(&self) -> TaskId {
        Task::id(self)
    }

    fn run(&self) -> Result<(), TaskError> {
        self.invoke().map(|_| ())
    }

    fn reject(&self, reason: TaskError) {
        Task::reject(self, reason)
    }
}
