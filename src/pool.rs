use super::{
    cancel::CancellationToken,
    errors::{ExecutorError, TaskError},
    handle::Future,
    model::{PoolMetrics, WorkerFault},
    result::{panic_message, TaskResult},
    task::{Job, Task},
};
use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use crossbeam::channel::{self, select, Receiver, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, trace};


/// Idle time after which a worker thread retires.
pub const DEFAULT_IDLE_LIFETIME: Duration = Duration::from_secs(3);

/// Receives failures that escaped every task result.
pub type UnhandledHandler = Arc<dyn Fn(WorkerFault) + Send + Sync>;

type BoxedJob = Box<dyn Job>;


/// Pool sizing and worker thread settings.
#[derive(Clone)]
pub struct Config {
    /// `None` grows the pool on demand.
    pub max_pool_size: Option<usize>,
    pub idle_lifetime: Duration,
    pub thread_name: String,
    pub stack_size: Option<usize>,
    pub on_unhandled: Option<UnhandledHandler>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("max_pool_size", &self.max_pool_size)
            .field("idle_lifetime", &self.idle_lifetime)
            .field("thread_name", &self.thread_name)
            .field("stack_size", &self.stack_size)
            .field("on_unhandled", &self.on_unhandled.is_some())
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_pool_size: None,
            idle_lifetime: DEFAULT_IDLE_LIFETIME,
            thread_name: "taskpool".to_string(),
            stack_size: None,
            on_unhandled: None,
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        Self {
            max_pool_size: Some(num_cpus::get()),
            ..Default::default()
        }
    }

    pub fn io_bound() -> Self {
        Self {
            max_pool_size: Some(num_cpus::get() * 2),
            idle_lifetime: Duration::from_secs(30),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ExecutorError> {
        if self.max_pool_size == Some(0) {
            return Err(ExecutorError::InvalidPoolSize);
        }
        if self.idle_lifetime.is_zero() {
            return Err(ExecutorError::InvalidIdleLifetime);
        }
        Ok(())
    }
}


#[derive(Clone)]
struct WorkerHandle {
    id: usize,
    inbox: Sender<BoxedJob>,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<WorkerHandle>,
    live: usize,
    busy: usize,
    in_flight: usize,
    stopping: bool,
    next_worker: usize,
}

struct Shared {
    config: Config,
    pool: Mutex<PoolState>,
    pool_changed: Condvar,
    stop: Receiver<()>,
    queued_tasks: AtomicUsize,
    total_submitted: AtomicUsize,
    completed_tasks: AtomicUsize,
    failed_tasks: AtomicUsize,
    cancelled_tasks: AtomicUsize,
}

impl Shared {
    /// Pops an idle worker, spawns one below the limit, or blocks until one returns.
    fn take_worker(self: &Arc<Self>) -> Result<WorkerHandle, ExecutorError> {
        let mut pool = self.pool.lock();
        loop {
            if let Some(worker) = pool.idle.pop() {
                pool.busy += 1;
                return Ok(worker);
            }
            if self.config.max_pool_size.map_or(true, |max| pool.live < max) {
                let worker = self.spawn_worker(&mut pool)?;
                pool.busy += 1;
                return Ok(worker);
            }
            self.pool_changed.wait(&mut pool);
        }
    }

    fn spawn_worker(self: &Arc<Self>, pool: &mut MutexGuard<'_, PoolState>) -> Result<WorkerHandle, ExecutorError> {
        let id = pool.next_worker;
        pool.next_worker += 1;

        let (inbox, jobs) = channel::unbounded();
        let handle = WorkerHandle { id, inbox };
        let worker = Worker {
            id,
            jobs,
            handle: handle.clone(),
            stop: self.stop.clone(),
            shared: Arc::clone(self),
        };

        let mut builder = thread::Builder::new().name(format!("{}-worker-{}", self.config.thread_name, id));
        if let Some(size) = self.config.stack_size {
            builder = builder.stack_size(size);
        }
        builder
            .spawn(move || worker.run())
            .map_err(|e| ExecutorError::Spawn(e.to_string()))?;

        pool.live += 1;
        debug!(worker = id, live = pool.live, "spawned worker");
        Ok(handle)
    }

    /// Puts a worker back after its task. Returns `false` if it should exit.
    fn release(&self, worker: &WorkerHandle) -> bool {
        let mut pool = self.pool.lock();
        pool.busy -= 1;
        pool.in_flight -= 1;
        let keep = !pool.stopping;
        if keep {
            pool.idle.push(worker.clone());
        } else {
            pool.live -= 1;
        }
        self.pool_changed.notify_all();
        keep
    }

    /// Removes an idle worker from the pool. Fails if the dispatcher already claimed it.
    fn retire(&self, id: usize) -> bool {
        let mut pool = self.pool.lock();
        match pool.idle.iter().position(|w| w.id == id) {
            Some(idx) => {
                pool.idle.swap_remove(idx);
                pool.live -= 1;
                self.pool_changed.notify_all();
                debug!(worker = id, live = pool.live, "worker retired");
                true
            }
            None => false,
        }
    }

    /// Finishes a job no worker will run.
    fn abandon(&self, job: BoxedJob, reason: String) {
        let task = job.id();
        job.reject(TaskError::Rejected(reason.clone()));
        self.failed_tasks.fetch_add(1, Ordering::Relaxed);
        {
            let mut pool = self.pool.lock();
            pool.in_flight -= 1;
            self.pool_changed.notify_all();
        }
        self.report(WorkerFault::SpawnFailed { task, message: reason });
    }

    fn report(&self, fault: WorkerFault) {
        match &self.config.on_unhandled {
            Some(handler) => {
                if catch_unwind(AssertUnwindSafe(|| handler(fault))).is_err() {
                    error!("unhandled-failure callback panicked");
                }
            }
            None => error!(?fault, "unhandled worker fault"),
        }
    }

    fn wait_until<F>(&self, timeout: Option<Duration>, mut done: F) -> bool
    where
        F: FnMut(&PoolState) -> bool,
    {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut pool = self.pool.lock();
        while !done(&pool) {
            match deadline {
                Some(deadline) => {
                    if self.pool_changed.wait_until(&mut pool, deadline).timed_out() {
                        return done(&pool);
                    }
                }
                None => self.pool_changed.wait(&mut pool),
            }
        }
        true
    }
}


struct Worker {
    id: usize,
    jobs: Receiver<BoxedJob>,
    handle: WorkerHandle,
    stop: Receiver<()>,
    shared: Arc<Shared>,
}

impl Worker {
    fn run(self) {
        let lifetime = self.shared.config.idle_lifetime;
        loop {
            let job = select! {
                recv(self.jobs) -> job => job.ok(),
                recv(self.stop) -> _ => self.retire_or_claimed(),
                default(lifetime) => self.retire_or_claimed(),
            };
            let Some(job) = job else { break };

            self.execute(job);
            if !self.shared.release(&self.handle) {
                break;
            }
        }
        debug!(worker = self.id, "worker terminated");
    }

    /// A worker missing from the idle pool has been claimed; its task is on the way.
    fn retire_or_claimed(&self) -> Option<BoxedJob> {
        if self.shared.retire(self.id) {
            None
        } else {
            self.jobs.recv().ok()
        }
    }

    fn execute(&self, job: BoxedJob) {
        let task = job.id();
        trace!(worker = self.id, %task, "running task");

        let shared = &self.shared;
        match catch_unwind(AssertUnwindSafe(|| job.run())) {
            Ok(Ok(())) => {
                shared.completed_tasks.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(TaskError::Cancelled)) => {
                shared.cancelled_tasks.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(TaskError::Panic(message))) => {
                shared.failed_tasks.fetch_add(1, Ordering::Relaxed);
                shared.report(WorkerFault::TaskPanicked { task, message });
            }
            Ok(Err(_)) => {
                shared.failed_tasks.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                job.reject(TaskError::Panic(message.clone()));
                shared.failed_tasks.fetch_add(1, Ordering::Relaxed);
                shared.report(WorkerFault::TaskPanicked { task, message });
            }
        }
    }
}


/// Bounded (or on-demand) pool of worker threads fed by a single dispatcher.
///
/// Submissions go through one FIFO queue. When the pool is at its limit the
/// dispatcher blocks until a worker frees up, which also holds back every
/// later submission.
pub struct Executor {
    shared: Arc<Shared>,
    submissions: Mutex<Option<Sender<BoxedJob>>>,
    stop: Mutex<Option<Sender<()>>>,
    dispatcher: Mutex<Option<thread::JoinHandle<()>>>,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.shared.config)
            .field("metrics", &self.metrics())
            .finish()
    }
}

impl Executor {
    pub fn new(
        max_pool_size: Option<usize>,
        idle_lifetime: Duration,
        on_unhandled: Option<UnhandledHandler>,
    ) -> Result<Self, ExecutorError> {
        let config = Config {
            max_pool_size,
            idle_lifetime,
            on_unhandled,
            ..Default::default()
        };
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Result<Self, ExecutorError> {
        config.validate()?;

        let (submit_tx, submit_rx) = channel::unbounded::<BoxedJob>();
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let name = format!("{}-dispatcher", config.thread_name);

        let shared = Arc::new(Shared {
            config,
            pool: Mutex::new(PoolState::default()),
            pool_changed: Condvar::new(),
            stop: stop_rx,
            queued_tasks: AtomicUsize::new(0),
            total_submitted: AtomicUsize::new(0),
            completed_tasks: AtomicUsize::new(0),
            failed_tasks: AtomicUsize::new(0),
            cancelled_tasks: AtomicUsize::new(0),
        });

        let dispatcher = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(name)
                .spawn(move || dispatch(shared, submit_rx))
                .map_err(|e| ExecutorError::Spawn(e.to_string()))?
        };

        Ok(Self {
            shared,
            submissions: Mutex::new(Some(submit_tx)),
            stop: Mutex::new(Some(stop_tx)),
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn submit<T, F>(&self, f: F) -> Result<Future<T>, ExecutorError>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> TaskResult<T> + Send + 'static,
    {
        self.submit_task(Task::new(f))
    }

    /// Submits a body that polls its own cancellation token.
    pub fn submit_cancellable<T, F>(&self, f: F) -> Result<Future<T>, ExecutorError>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&CancellationToken) -> TaskResult<T> + Send + 'static,
    {
        self.submit_task(Task::cancellable(f))
    }

    /// Submits a body that is also cancelled through `token`'s source.
    pub fn submit_with_token<T, F>(&self, token: &CancellationToken, f: F) -> Result<Future<T>, ExecutorError>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&CancellationToken) -> TaskResult<T> + Send + 'static,
    {
        self.submit_task(Task::with_token(token, f))
    }

    /// Queues a prepared task, e.g. one with continuations attached.
    pub fn submit_task<T>(&self, task: Task<T>) -> Result<Future<T>, ExecutorError>
    where
        T: Clone + Send + 'static,
    {
        let submissions = self.submissions.lock();
        let queue = submissions.as_ref().ok_or(ExecutorError::ShutDown)?;

        self.shared.pool.lock().in_flight += 1;
        self.shared.queued_tasks.fetch_add(1, Ordering::Relaxed);

        if queue.send(Box::new(task.clone())).is_err() {
            self.shared.queued_tasks.fetch_sub(1, Ordering::Relaxed);
            let mut pool = self.shared.pool.lock();
            pool.in_flight -= 1;
            self.shared.pool_changed.notify_all();
            return Err(ExecutorError::ShutDown);
        }
        self.shared.total_submitted.fetch_add(1, Ordering::Relaxed);

        Ok(Future::new(task))
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        let pool = self.shared.pool.lock();
        PoolMetrics {
            live_workers: pool.live,
            idle_workers: pool.idle.len(),
            busy_workers: pool.busy,
            queued_tasks: self.shared.queued_tasks.load(Ordering::Relaxed),
            in_flight: pool.in_flight,
            total_submitted: self.shared.total_submitted.load(Ordering::Relaxed),
            completed_tasks: self.shared.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.shared.failed_tasks.load(Ordering::Relaxed),
            cancelled_tasks: self.shared.cancelled_tasks.load(Ordering::Relaxed),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.submissions.lock().is_none()
    }

    /// Blocks until every submitted task has been run or rejected.
    pub fn join_all(&self) {
        self.shared.wait_until(None, |pool| pool.in_flight == 0);
    }

    pub fn join_all_timeout(&self, timeout: Duration) -> bool {
        self.shared.wait_until(Some(timeout), |pool| pool.in_flight == 0)
    }

    /// Stops accepting work, runs everything already queued, then retires all workers.
    pub fn shutdown(&self) {
        if let Some(dispatcher) = self.close_queue() {
            if dispatcher.join().is_err() {
                error!("dispatcher thread panicked");
            }
        }
        self.join_all();
        self.stop_workers();
        self.shared.wait_until(None, |pool| pool.live == 0);
        debug!("executor shut down");
    }

    /// Like [`shutdown`](Self::shutdown) with a deadline. Returns `false` if
    /// tasks or workers were still running when it passed.
    pub fn shutdown_timeout(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        drop(self.close_queue());
        let drained = self.join_all_timeout(timeout);
        self.stop_workers();
        let remaining = timeout.saturating_sub(started.elapsed());
        drained && self.shared.wait_until(Some(remaining), |pool| pool.live == 0)
    }

    fn close_queue(&self) -> Option<thread::JoinHandle<()>> {
        drop(self.submissions.lock().take());
        self.dispatcher.lock().take()
    }

    fn stop_workers(&self) {
        self.shared.pool.lock().stopping = true;
        drop(self.stop.lock().take());
        self.shared.pool_changed.notify_all();
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        drop(self.close_queue());
        self.stop_workers();
    }
}


fn dispatch(shared: Arc<Shared>, submissions: Receiver<BoxedJob>) {
    for job in submissions.iter() {
        shared.queued_tasks.fetch_sub(1, Ordering::Relaxed);
        match shared.take_worker() {
            Ok(worker) => {
                trace!(task = %job.id(), worker = worker.id, "dispatching task");
                if let Err(channel::SendError(job)) = worker.inbox.send(job) {
                    {
                        let mut pool = shared.pool.lock();
                        pool.busy -= 1;
                        pool.live -= 1;
                    }
                    shared.abandon(job, format!("worker {} inbox closed", worker.id));
                }
            }
            Err(err) => {
                error!(%err, "no worker available");
                shared.abandon(job, err.to_string());
            }
        }
    }
    debug!("submission queue closed");
}
