//! Tokio-backed timer source.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;

use flowguard_core::time::saturating_add;

use super::{run_guarded, OnceTask, RepeatingTask, TimerHandle, TimerSource, MIN_PERIOD};
use crate::RuntimeError;

/// Timer source running tasks on a Tokio runtime.
///
/// Uses `tokio::time`, so `tokio::time::pause()` and `advance()` drive it
/// in tests.
#[derive(Debug, Clone)]
pub struct TokioTimer {
    handle: Handle,
}

impl TokioTimer {
    /// Bind to the runtime of the calling context.
    pub fn new() -> Result<Self, RuntimeError> {
        Handle::try_current()
            .map(Self::with_handle)
            .map_err(|_| RuntimeError::NoAsyncRuntime)
    }

    /// Bind to an explicit runtime handle.
    pub fn with_handle(handle: Handle) -> Self {
        Self { handle }
    }
}

impl TimerSource for TokioTimer {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn schedule_once(&self, delay: Duration, task: OnceTask) -> TimerHandle {
        let mut handle = TimerHandle::new(None);
        let cancelled = handle.flag();

        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if !cancelled.load(Ordering::SeqCst) {
                run_guarded(task);
            }
        });

        handle.set_abort(join.abort_handle());
        handle
    }

    fn schedule_repeating(&self, period: Duration, task: RepeatingTask) -> TimerHandle {
        let period = period.max(MIN_PERIOD);
        let mut handle = TimerHandle::new(None);
        let cancelled = handle.flag();

        let join = self.handle.spawn(async move {
            let start = tokio::time::Instant::from_std(saturating_add(
                tokio::time::Instant::now().into_std(),
                period,
            ));
            let mut ticks = tokio::time::interval_at(start, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticks.tick().await;
                if cancelled.load(Ordering::SeqCst) {
                    break;
                }
                let task = task.clone();
                run_guarded(move || task());
            }
        });

        handle.set_abort(join.abort_handle());
        handle
    }
}
