//! Clock and timer sources.
//!
//! Caches and breakers never read the wall clock or spawn tasks directly.
//! They get "now" and their deferred callbacks from a [`TimerSource`], so
//! production code runs on Tokio while tests drive a [`ManualTimer`].
//!
//! # Cancellation
//! A cancelled task does not start once the scheduler sees the flag. A task
//! already running when `cancel` is called is not interrupted; owners that
//! need a hard barrier re-check their own state under their own lock (the
//! cache and breaker both do).
//!
//! # Panics
//! A task that panics is caught and logged. It never unwinds into the
//! scheduler or into unrelated callers.

mod live;
mod manual;

pub use live::TokioTimer;
pub use manual::ManualTimer;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A one-shot deferred callback.
pub type OnceTask = Box<dyn FnOnce() + Send + 'static>;

/// A periodic callback.
pub type RepeatingTask = Arc<dyn Fn() + Send + Sync + 'static>;

/// Shared timer source handed to caches and breakers.
pub type SharedTimer = Arc<dyn TimerSource>;

/// Smallest period accepted for repeating tasks.
pub(crate) const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Source of "now" and of deferred/periodic callbacks.
pub trait TimerSource: Send + Sync {
    /// Current instant on this source's clock.
    fn now(&self) -> Instant;

    /// Run `task` once after `delay`.
    fn schedule_once(&self, delay: Duration, task: OnceTask) -> TimerHandle;

    /// Run `task` every `period`, first after one full period.
    fn schedule_repeating(&self, period: Duration, task: RepeatingTask) -> TimerHandle;
}

/// Handle to a scheduled task.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    abort: Option<tokio::task::AbortHandle>,
}

impl TimerHandle {
    pub(crate) fn new(abort: Option<tokio::task::AbortHandle>) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            abort,
        }
    }

    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub(crate) fn set_abort(&mut self, abort: tokio::task::AbortHandle) {
        self.abort = Some(abort);
    }

    /// Cancel the task. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    /// Whether `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Run a timer task, containing any panic.
pub(crate) fn run_guarded<F: FnOnce()>(task: F) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(panic = %message, "Timer task panicked");
    }
}
