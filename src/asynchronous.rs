//! Calling a function "asynchronously": each call submits it to an executor
//! and hands back the [`Future`] instead of the value.

use super::{
    errors::ExecutorError,
    handle::Future,
    pool::{Config, Executor},
    result::TaskResult,
};
use std::sync::Arc;
use parking_lot::RwLock;


static DEFAULT_EXECUTOR: RwLock<Option<Arc<Executor>>> = RwLock::new(None);

/// Process-wide on-demand executor, created on first use.
pub fn default_executor() -> Result<Arc<Executor>, ExecutorError> {
    if let Some(executor) = DEFAULT_EXECUTOR.read().as_ref() {
        return Ok(Arc::clone(executor));
    }
    let mut slot = DEFAULT_EXECUTOR.write();
    if let Some(executor) = slot.as_ref() {
        return Ok(Arc::clone(executor));
    }
    let executor = Arc::new(Executor::with_config(Config {
        thread_name: "taskpool-default".to_string(),
        ..Default::default()
    })?);
    *slot = Some(Arc::clone(&executor));
    Ok(executor)
}

/// Replaces the process-wide executor, returning the previous one.
pub fn set_default_executor(executor: Arc<Executor>) -> Option<Arc<Executor>> {
    DEFAULT_EXECUTOR.write().replace(executor)
}


/// Function bound to an executor.
///
/// Arguments travel as one typed value; use a tuple or a struct for several.
pub struct AsyncFn<A, T> {
    func: Arc<dyn Fn(A) -> TaskResult<T> + Send + Sync>,
    executor: Arc<Executor>,
}

impl<A, T> Clone for AsyncFn<A, T> {
    fn clone(&self) -> Self {
        Self {
            func: Arc::clone(&self.func),
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<A, T> AsyncFn<A, T>
where
    A: Send + 'static,
    T: Clone + Send + 'static,
{
    pub fn new<F>(executor: Arc<Executor>, func: F) -> Self
    where
        F: Fn(A) -> TaskResult<T> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            executor,
        }
    }

    /// Binds `func` to the [`default_executor`].
    pub fn on_default<F>(func: F) -> Result<Self, ExecutorError>
    where
        F: Fn(A) -> TaskResult<T> + Send + Sync + 'static,
    {
        Ok(Self::new(default_executor()?, func))
    }

    #[inline]
    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn call(&self, args: A) -> Result<Future<T>, ExecutorError> {
        let func = Arc::clone(&self.func);
        self.executor.submit(move || func(args))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TaskError;
    use std::time::Duration;

    struct Division {
        a: i64,
        b: i64,
    }

    #[test]
    fn calls_are_submitted() {
        let executor = Arc::new(Executor::new(Some(2), Duration::from_secs(1), None).unwrap());
        let divide = AsyncFn::new(executor.clone(), |Division { a, b }| {
            a.checked_div(b).ok_or_else(|| TaskError::failed("division by zero"))
        });

        let ok = divide.call(Division { a: 9, b: 3 }).unwrap();
        let bad = divide.clone().call(Division { a: 1, b: 0 }).unwrap();
        assert!(Arc::ptr_eq(divide.executor(), &executor));
        assert_eq!(ok.get(None), Ok(Some(3)));
        assert_eq!(bad.get(None), Err(TaskError::Failed("division by zero".into())));

        executor.shutdown();
        assert_eq!(divide.call(Division { a: 1, b: 1 }).unwrap_err(), ExecutorError::ShutDown);
    }

    #[test]
    fn default_executor_is_shared_and_replaceable() {
        let first = default_executor().unwrap();
        let second = default_executor().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let square = AsyncFn::on_default(|x: u32| Ok(x * x)).unwrap();
        assert_eq!(square.call(12).unwrap().get(None), Ok(Some(144)));

        let replacement = Arc::new(Executor::with_config(Config::default()).unwrap());
        let previous = set_default_executor(replacement.clone()).unwrap();
        assert!(Arc::ptr_eq(&previous, &first));
        assert!(Arc::ptr_eq(&default_executor().unwrap(), &replacement));
        set_default_executor(previous);
    }
}
