use super::{
    cancel::{CancellationToken, CancellationTokenSource},
    errors::ExecutorError,
    pool::Executor,
    result::TaskResult,
};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};
use crossbeam::channel::{self, select, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, warn};


/// Submits `handler` to an executor once per `interval` until cancelled.
///
/// The handler receives the 1-based tick number and the tick's cancellation
/// token, which fires when the timer is cancelled. Ticks still queued at that
/// point finish as cancelled without running.
pub struct PeriodicTimer {
    interval: Duration,
    ticks: Arc<AtomicU64>,
    source: CancellationTokenSource,
    stop: Mutex<Option<Sender<()>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl PeriodicTimer {
    pub fn start<F>(executor: Arc<Executor>, interval: Duration, handler: F) -> Result<Self, ExecutorError>
    where
        F: Fn(u64, &CancellationToken) -> TaskResult<()> + Send + Sync + 'static,
    {
        if interval.is_zero() {
            return Err(ExecutorError::InvalidInterval);
        }

        let ticks = Arc::new(AtomicU64::new(0));
        let source = CancellationTokenSource::new();
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);

        let thread = {
            let ticks = Arc::clone(&ticks);
            let token = source.new_token();
            let handler = Arc::new(handler);
            let ticker = channel::tick(interval);
            thread::Builder::new()
                .name(format!("{}-timer", executor.config().thread_name))
                .spawn(move || loop {
                    select! {
                        recv(ticker) -> _ => {
                            // only this thread writes the counter
                            let tick = ticks.load(Ordering::Relaxed) + 1;
                            let handler = Arc::clone(&handler);
                            let submitted = executor.submit_with_token(&token, move |token| {
                                let result = handler(tick, token);
                                if let Err(err) = &result {
                                    warn!(tick, %err, "timer tick failed");
                                }
                                result
                            });
                            match submitted {
                                Ok(_) => ticks.store(tick, Ordering::Relaxed),
                                Err(err) => {
                                    debug!(%err, "timer stopped: executor rejected tick");
                                    break;
                                }
                            }
                        }
                        recv(stop_rx) -> _ => break,
                    }
                })
                .map_err(|e| ExecutorError::Spawn(e.to_string()))?
        };

        Ok(Self {
            interval,
            ticks,
            source,
            stop: Mutex::new(Some(stop_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ticks submitted so far.
    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.source.is_cancelled()
    }

    /// Stops ticking and waits for the timer thread. Idempotent.
    pub fn cancel(&self) {
        self.source.cancel();
        drop(self.stop.lock().take());
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                error!("timer thread panicked");
            }
        }
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TaskError;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[test]
    fn rejects_zero_interval() {
        let executor = Arc::new(Executor::new(Some(1), Duration::from_secs(1), None).unwrap());
        let err = PeriodicTimer::start(executor, Duration::ZERO, |_, _| Ok(())).err();
        assert_eq!(err, Some(ExecutorError::InvalidInterval));
    }

    #[test]
    fn ticks_until_cancelled() {
        let executor = Arc::new(Executor::new(Some(2), Duration::from_secs(1), None).unwrap());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let timer = PeriodicTimer::start(executor.clone(), Duration::from_millis(20), move |tick, _| {
            c.fetch_add(1, Ordering::SeqCst);
            if tick % 2 == 0 {
                Err(TaskError::failed("even tick"))
            } else {
                Ok(())
            }
        })
        .unwrap();
        assert_eq!(timer.interval(), Duration::from_millis(20));

        thread::sleep(Duration::from_millis(200));
        timer.cancel();
        assert!(timer.is_cancelled());

        let ticks = timer.ticks();
        assert!(ticks >= 3, "only {} ticks", ticks);

        executor.join_all();
        assert!(calls.load(Ordering::SeqCst) as u64 <= ticks);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(timer.ticks(), ticks);

        let metrics = executor.metrics();
        assert_eq!(metrics.total_submitted as u64, ticks);
        assert!(metrics.failed_tasks >= 1);
    }

    #[test]
    fn rejected_ticks_are_not_counted() {
        let executor = Arc::new(Executor::new(Some(1), Duration::from_secs(1), None).unwrap());
        executor.shutdown();

        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let timer = PeriodicTimer::start(executor.clone(), Duration::from_millis(10), move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(timer.ticks(), 0);
        assert_eq!(executor.metrics().total_submitted, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        timer.cancel();
    }

    #[test]
    fn running_tick_observes_cancel() {
        let executor = Arc::new(Executor::new(Some(1), Duration::from_secs(1), None).unwrap());
        let started = Arc::new(AtomicBool::new(false));
        let stopped_early = Arc::new(AtomicUsize::new(0));
        let (s, e) = (started.clone(), stopped_early.clone());
        let timer = PeriodicTimer::start(executor.clone(), Duration::from_millis(10), move |_, token| {
            s.store(true, Ordering::SeqCst);
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while std::time::Instant::now() < deadline {
                if token.is_cancelled() {
                    e.fetch_add(1, Ordering::SeqCst);
                    return Err(TaskError::Cancelled);
                }
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        })
        .unwrap();

        let wait_start = std::time::Instant::now();
        while !started.load(Ordering::SeqCst) {
            assert!(wait_start.elapsed() < Duration::from_secs(2), "tick never started");
            thread::sleep(Duration::from_millis(5));
        }

        timer.cancel();
        assert!(executor.join_all_timeout(Duration::from_secs(2)));
        // one worker: only the first tick ran, later ones were cancelled in the queue
        assert_eq!(stopped_early.load(Ordering::SeqCst), 1);
        assert_eq!(executor.metrics().completed_tasks, 0);
    }
}
