use super::{
    errors::{ExecutorError, TaskError},
    result::TaskResult,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio_util::sync::CancellationToken as Flag;


/// Owner side of a cancellation flag.
///
/// Clones share the same flag. Tokens handed out by [`new_token`](Self::new_token)
/// only observe it.
#[derive(Debug, Clone, Default)]
pub struct CancellationTokenSource {
    flag: Flag,
    fired: Arc<AtomicBool>,
}

impl CancellationTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_flag(flag: Flag) -> Self {
        Self {
            flag,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    #[inline]
    pub fn new_token(&self) -> CancellationToken {
        CancellationToken { flag: self.flag.clone() }
    }

    /// Source cancelled together with this one, but cancellable on its own.
    pub fn child(&self) -> CancellationTokenSource {
        Self::from_flag(self.flag.child_token())
    }

    #[inline]
    pub fn cancel(&self) {
        self.fired.store(true, Ordering::Release);
        self.flag.cancel();
    }

    /// Like [`cancel`](Self::cancel), but fails if the source was already terminal.
    pub fn try_cancel(&self) -> Result<(), ExecutorError> {
        if self.fired.swap(true, Ordering::AcqRel) || self.flag.is_cancelled() {
            return Err(ExecutorError::AlreadyCancelled);
        }
        self.flag.cancel();
        Ok(())
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.is_cancelled()
    }
}


/// Read-only view of a [`CancellationTokenSource`].
#[derive(Debug, Clone)]
pub struct CancellationToken {
    flag: Flag,
}

impl CancellationToken {
    /// Token that is never cancelled.
    pub fn none() -> Self {
        Self { flag: Flag::new() }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.is_cancelled()
    }

    /// Checkpoint for task bodies: `token.check()?`.
    #[inline]
    pub fn check(&self) -> TaskResult<()> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub async fn cancelled(&self) {
        self.flag.cancelled().await
    }

    pub(crate) fn child_source(&self) -> CancellationTokenSource {
        CancellationTokenSource::from_flag(self.flag.child_token())
    }
}
