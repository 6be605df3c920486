//! Circuit breaker guarding a fallible async operation.
//!
//! When calls fail repeatedly the circuit opens and subsequent calls fail
//! fast with [`CircuitOpenError`] until the timeout elapses. The state
//! machine itself lives in [`flowguard_core::BreakerMachine`]; this type
//! adds the clock, the lock and the background force-reset timer.

use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;

use flowguard_core::{
    Admission, BreakerConfig, BreakerMachine, BreakerSnapshot, CallContext, Opened,
};

use crate::timer::{SharedTimer, TimerHandle};
use crate::RuntimeError;

/// Fast-fail returned while the circuit is open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Circuit breaker is OPEN for {operation}")]
pub struct CircuitOpenError {
    /// Operation named in the call context, or "operation"
    pub operation: String,

    /// Time left until a trial call is admitted
    pub retry_in: Duration,
}

/// Error from [`CircuitBreaker::execute`].
#[derive(Error, Debug)]
pub enum ExecuteError<E> {
    /// Rejected without running the operation
    #[error(transparent)]
    Open(#[from] CircuitOpenError),

    /// The operation ran and failed; its error is carried unchanged
    #[error("{0}")]
    Operation(E),
}

impl<E> ExecuteError<E> {
    /// Whether the breaker rejected the call.
    pub fn is_open(&self) -> bool {
        matches!(self, ExecuteError::Open(_))
    }

    /// The operation's own error, if it ran.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            ExecuteError::Operation(e) => Some(e),
            ExecuteError::Open(_) => None,
        }
    }

    pub fn into_operation(self) -> Option<E> {
        match self {
            ExecuteError::Operation(e) => Some(e),
            ExecuteError::Open(_) => None,
        }
    }
}

struct Inner {
    machine: BreakerMachine,
    reset_timer: Option<TimerHandle>,
}

struct Shared {
    name: String,
    timer: SharedTimer,
    inner: Mutex<Inner>,
}

impl Shared {
    /// Force-reset timer callback.
    fn force_reset(&self, generation: u64) {
        let now = self.timer.now();
        let mut inner = self.inner.lock();
        if inner.machine.force_reset(now, generation) {
            inner.reset_timer = None;
            tracing::info!(breaker = %self.name, "Circuit force-reset to closed");
        }
    }
}

/// Circuit breaker for one dependency.
///
/// The lock is never held while the operation runs. Dropping the breaker
/// cancels its pending force-reset.
pub struct CircuitBreaker {
    shared: Arc<Shared>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(config: BreakerConfig, timer: SharedTimer) -> Result<Self, RuntimeError> {
        Self::named("breaker", config, timer)
    }

    /// Create a closed breaker with a name used in log fields.
    pub fn named(
        name: impl Into<String>,
        config: BreakerConfig,
        timer: SharedTimer,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                name: name.into(),
                timer,
                inner: Mutex::new(Inner {
                    machine: BreakerMachine::new(config),
                    reset_timer: None,
                }),
            }),
        })
    }

    /// Run `operation` through the breaker.
    ///
    /// While open and not past `next_attempt_at` the operation is not
    /// invoked. Otherwise its outcome drives the state machine and its
    /// error, if any, is returned inside [`ExecuteError::Operation`].
    pub async fn execute<T, E, F, Fut>(
        &self,
        context: &CallContext,
        operation: F,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let now = self.shared.timer.now();
        let admission = self.shared.inner.lock().machine.admit(now);

        match admission {
            Admission::Rejected { next_attempt_at } => {
                tracing::debug!(
                    breaker = %self.shared.name,
                    operation = context.operation_name(),
                    "Call rejected by open circuit"
                );
                return Err(CircuitOpenError {
                    operation: context.operation_name().to_string(),
                    retry_in: next_attempt_at.saturating_duration_since(now),
                }
                .into());
            }
            Admission::Trial => {
                tracing::info!(
                    breaker = %self.shared.name,
                    operation = context.operation_name(),
                    "Circuit half-open, admitting trial call"
                );
            }
            Admission::Allowed => {}
        }

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(error) => {
                self.on_failure(context);
                Err(ExecuteError::Operation(error))
            }
        }
    }

    fn on_success(&self) {
        let closed = self.shared.inner.lock().machine.record_success();
        if closed {
            tracing::info!(breaker = %self.shared.name, "Circuit closed after successful recovery");
        }
    }

    fn on_failure(&self, context: &CallContext) {
        let now = self.shared.timer.now();
        let mut inner = self.shared.inner.lock();

        let Some(opened) = inner.machine.record_failure(now) else {
            return;
        };

        if let Some(previous) = inner.reset_timer.take() {
            previous.cancel();
        }
        inner.reset_timer = Some(self.schedule_reset(&opened, now));
        drop(inner);

        if opened.from_half_open {
            tracing::warn!(
                breaker = %self.shared.name,
                operation = context.operation_name(),
                "Circuit reopened after failed recovery attempt"
            );
        } else {
            tracing::warn!(
                breaker = %self.shared.name,
                operation = context.operation_name(),
                failures = opened.failure_count,
                "Circuit opened after repeated failures"
            );
        }
    }

    fn schedule_reset(&self, opened: &Opened, now: Instant) -> TimerHandle {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let generation = opened.generation;
        self.shared.timer.schedule_once(
            opened.reset_deadline.saturating_duration_since(now),
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.force_reset(generation);
                }
            }),
        )
    }

    /// Current state. Read-only: an elapsed timeout is not applied here.
    pub fn state(&self) -> BreakerSnapshot {
        self.shared.inner.lock().machine.snapshot()
    }

    pub fn config(&self) -> BreakerConfig {
        self.shared.inner.lock().machine.config().clone()
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

impl Drop for CircuitBreaker {
    fn drop(&mut self) {
        if let Some(timer) = self.shared.inner.lock().reset_timer.take() {
            timer.cancel();
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}
