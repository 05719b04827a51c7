//! Bounded thread-pool task executor.
//!
//! # Features
//! - Worker threads created on demand, retired after an idle lifetime
//! - Optional pool limit with backpressure on the dispatcher
//! - Memoized tasks with ordered continuations, run at most once
//! - Blocking and async retrieval with timeouts
//! - Cooperative cancellation through tokens
//! - Periodic timers and executor-bound functions

pub mod asynchronous;
pub mod cancel;
pub mod errors;
pub mod handle;
pub mod model;
pub mod pool;
pub mod result;
pub mod task;
pub mod timer;

pub use asynchronous::{default_executor, set_default_executor, AsyncFn};
pub use cancel::{CancellationToken, CancellationTokenSource};
pub use errors::{ExecutorError, TaskError};
pub use handle::{join_all_async, Future};
pub use model::{CancelKind, PoolMetrics, TaskStatus, WorkerFault};
pub use pool::{Config, Executor, UnhandledHandler, DEFAULT_IDLE_LIFETIME};
pub use result::TaskResult;
pub use task::{Task, TaskId};
pub use timer::PeriodicTimer;
