//! Circuit breaker state machine.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - HalfOpen: trial calls decide whether to close or re-open
//!
//! # State Transitions
//! ```text
//! Closed   → Open:     failure_count reaches failure_threshold
//! Open     → HalfOpen: admit() called after next_attempt_at
//! HalfOpen → Closed:   success_count reaches success_threshold
//! HalfOpen → Open:     any failure (re-arms next_attempt_at)
//! Open     → Closed:   force_reset() with the current generation, once
//!                      next_attempt_at + reset_timeout has passed
//! ```
//!
//! The machine never reads a clock. Every time-dependent method takes the
//! caller's `now`, which keeps it deterministic under test.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::config::BreakerConfig;
use crate::time::saturating_add;

/// State of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation
    Closed,

    /// Calls are rejected without running
    Open,

    /// Testing whether the dependency recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Read-only view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Set only while open
    pub next_attempt_at: Option<Instant>,
}

/// Outcome of asking the breaker whether a call may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Closed or already half-open; run the call
    Allowed,

    /// The breaker just moved Open → HalfOpen; this call is a trial
    Trial,

    /// Open and not yet past `next_attempt_at`
    Rejected { next_attempt_at: Instant },
}

impl Admission {
    /// Whether the call may run.
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Admission::Rejected { .. })
    }
}

/// Emitted when a failure (re-)opens the circuit.
///
/// The runtime schedules the force-reset check from this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opened {
    pub next_attempt_at: Instant,

    /// When the force-reset guard starts to hold
    pub reset_deadline: Instant,

    /// Generation captured for the stale-timer guard
    pub generation: u64,

    /// True when a half-open trial failed
    pub from_half_open: bool,

    pub failure_count: u32,
}

/// Deterministic breaker state.
///
/// `success_count` is nonzero only while half-open, and `next_attempt_at`
/// is set only while open.
#[derive(Debug, Clone)]
pub struct BreakerMachine {
    config: BreakerConfig,
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    next_attempt_at: Option<Instant>,
    generation: u64,
}

impl BreakerMachine {
    /// Create a closed breaker.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            next_attempt_at: None,
            generation: 0,
        }
    }

    /// Decide whether a call may run at `now`.
    pub fn admit(&mut self, now: Instant) -> Admission {
        match (self.state, self.next_attempt_at) {
            (CircuitState::Open, Some(next_attempt_at)) if now <= next_attempt_at => {
                Admission::Rejected { next_attempt_at }
            }
            (CircuitState::Open, _) => {
                self.state = CircuitState::HalfOpen;
                self.success_count = 0;
                self.next_attempt_at = None;
                Admission::Trial
            }
            _ => Admission::Allowed,
        }
    }

    /// Record a successful call.
    ///
    /// Returns true if this success closed the circuit.
    pub fn record_success(&mut self) -> bool {
        self.failure_count = 0;

        if self.state != CircuitState::HalfOpen {
            return false;
        }

        self.success_count += 1;
        if self.success_count >= self.config.success_threshold {
            self.close();
            return true;
        }
        false
    }

    /// Record a failed call at `now`.
    ///
    /// Returns `Some` if this failure opened (or re-opened) the circuit.
    pub fn record_failure(&mut self, now: Instant) -> Option<Opened> {
        self.failure_count = self.failure_count.saturating_add(1);

        let from_half_open = match self.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed if self.failure_count >= self.config.failure_threshold => false,
            // Open: a call admitted before the circuit opened finished late
            _ => return None,
        };

        let next_attempt_at = saturating_add(now, self.config.timeout);
        self.state = CircuitState::Open;
        self.success_count = 0;
        self.next_attempt_at = Some(next_attempt_at);
        self.generation = self.generation.wrapping_add(1);

        Some(Opened {
            next_attempt_at,
            reset_deadline: saturating_add(next_attempt_at, self.config.reset_timeout),
            generation: self.generation,
            from_half_open,
            failure_count: self.failure_count,
        })
    }

    /// Background force-reset.
    ///
    /// Only acts if the breaker is still open under the same generation the
    /// timer captured and `next_attempt_at + reset_timeout` has passed.
    /// Returns true if the circuit was closed.
    pub fn force_reset(&mut self, now: Instant, generation: u64) -> bool {
        let still_due = match (self.state, self.next_attempt_at) {
            (CircuitState::Open, Some(next_attempt_at)) => {
                generation == self.generation
                    && now >= saturating_add(next_attempt_at, self.config.reset_timeout)
            }
            _ => false,
        };

        if still_due {
            self.close();
        }
        still_due
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.next_attempt_at = None;
    }

    /// Current state without mutating anything.
    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            next_attempt_at: self.next_attempt_at,
        }
    }

    /// Current open generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }
}

impl Default for BreakerMachine {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn config(failures: u32, successes: u32) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: failures,
            success_threshold: successes,
            timeout: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_starts_closed() {
        let mut machine = BreakerMachine::default();
        let snapshot = machine.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.next_attempt_at, None);
        assert_eq!(machine.admit(Instant::now()), Admission::Allowed);
    }

    #[test]
    fn test_opens_after_threshold() {
        let mut machine = BreakerMachine::new(config(2, 1));
        let t0 = Instant::now();

        assert!(machine.record_failure(t0).is_none());
        let opened = machine.record_failure(t0).expect("second failure opens");

        assert!(!opened.from_half_open);
        assert_eq!(opened.next_attempt_at, t0 + Duration::from_secs(10));
        assert_eq!(opened.reset_deadline, t0 + Duration::from_secs(70));
        assert_eq!(machine.snapshot().state, CircuitState::Open);
        assert_eq!(
            machine.admit(t0 + Duration::from_secs(10)),
            Admission::Rejected {
                next_attempt_at: t0 + Duration::from_secs(10)
            }
        );
    }

    #[test]
    fn test_success_resets_failures() {
        let mut machine = BreakerMachine::new(config(3, 1));
        let t0 = Instant::now();

        machine.record_failure(t0);
        machine.record_failure(t0);
        machine.record_success();

        // Need 3 more failures to open
        machine.record_failure(t0);
        machine.record_failure(t0);
        assert_eq!(machine.snapshot().state, CircuitState::Closed);
        assert_eq!(machine.snapshot().failure_count, 2);
    }

    #[test]
    fn test_half_open_closes_after_successes() {
        let mut machine = BreakerMachine::new(config(1, 3));
        let t0 = Instant::now();
        machine.record_failure(t0);

        let later = t0 + Duration::from_secs(11);
        assert_eq!(machine.admit(later), Admission::Trial);
        assert_eq!(machine.snapshot().state, CircuitState::HalfOpen);
        assert_eq!(machine.snapshot().next_attempt_at, None);

        assert!(!machine.record_success());
        assert!(!machine.record_success());
        assert_eq!(machine.snapshot().success_count, 2);
        assert!(machine.record_success());

        let snapshot = machine.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.success_count, 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut machine = BreakerMachine::new(config(1, 3));
        let t0 = Instant::now();
        machine.record_failure(t0);

        let later = t0 + Duration::from_secs(11);
        machine.admit(later);
        machine.record_success();

        let opened = machine.record_failure(later).expect("trial failure reopens");
        assert!(opened.from_half_open);
        assert_eq!(opened.generation, 2);
        assert_eq!(opened.next_attempt_at, later + Duration::from_secs(10));

        let snapshot = machine.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.success_count, 0);
    }

    #[test]
    fn test_late_failure_while_open_does_not_rearm() {
        let mut machine = BreakerMachine::new(config(1, 1));
        let t0 = Instant::now();
        let opened = machine.record_failure(t0).unwrap();

        assert!(machine.record_failure(t0 + Duration::from_secs(5)).is_none());
        assert_eq!(machine.generation(), opened.generation);
        assert_eq!(machine.snapshot().next_attempt_at, Some(opened.next_attempt_at));
    }

    #[test]
    fn test_force_reset_requires_deadline() {
        let mut machine = BreakerMachine::new(config(1, 1));
        let t0 = Instant::now();
        let opened = machine.record_failure(t0).unwrap();

        assert!(!machine.force_reset(t0 + Duration::from_secs(60), opened.generation));
        assert_eq!(machine.snapshot().state, CircuitState::Open);

        assert!(machine.force_reset(opened.reset_deadline, opened.generation));
        assert_eq!(machine.snapshot().state, CircuitState::Closed);
        assert_eq!(machine.snapshot().failure_count, 0);
    }

    #[test]
    fn test_stale_force_reset_ignored() {
        let mut machine = BreakerMachine::new(config(1, 1));
        let t0 = Instant::now();
        let first = machine.record_failure(t0).unwrap();

        // Trial fails, breaker re-armed under a new generation
        let t1 = t0 + Duration::from_secs(11);
        machine.admit(t1);
        let second = machine.record_failure(t1).unwrap();
        assert_ne!(first.generation, second.generation);

        assert!(!machine.force_reset(first.reset_deadline + Duration::from_secs(1), first.generation));
        assert_eq!(machine.snapshot().state, CircuitState::Open);
    }

    #[test]
    fn test_force_reset_ignored_when_closed() {
        let mut machine = BreakerMachine::new(config(1, 1));
        let t0 = Instant::now();
        let opened = machine.record_failure(t0).unwrap();

        machine.admit(t0 + Duration::from_secs(11));
        assert!(machine.record_success());

        assert!(!machine.force_reset(opened.reset_deadline, opened.generation));
        assert_eq!(machine.snapshot().state, CircuitState::Closed);
    }

    #[test]
    fn test_unbounded_timeouts_stay_open() {
        let mut machine = BreakerMachine::new(BreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            timeout: Duration::MAX,
            reset_timeout: Duration::MAX,
        });
        let t0 = Instant::now();

        let opened = machine.record_failure(t0).unwrap();
        assert!(opened.next_attempt_at > t0);
        assert_eq!(opened.reset_deadline, opened.next_attempt_at);

        let later = t0 + Duration::from_secs(3_155_760_000);
        assert!(!machine.admit(later).is_allowed());
        assert!(!machine.force_reset(later, opened.generation));
        assert_eq!(machine.snapshot().state, CircuitState::Open);
    }

    #[derive(Debug, Clone)]
    enum Event {
        Call { ok: bool },
        Wait { secs: u64 },
    }

    fn event() -> impl Strategy<Value = Event> {
        prop_oneof![
            any::<bool>().prop_map(|ok| Event::Call { ok }),
            (0u64..30).prop_map(|secs| Event::Wait { secs }),
        ]
    }

    proptest! {
        #[test]
        fn prop_state_invariants_hold(
            failures in 1u32..6,
            successes in 1u32..4,
            events in prop::collection::vec(event(), 0..60),
        ) {
            let mut machine = BreakerMachine::new(config(failures, successes));
            let mut now = Instant::now();

            for event in events {
                match event {
                    Event::Wait { secs } => now += Duration::from_secs(secs),
                    Event::Call { ok } => {
                        if machine.admit(now).is_allowed() {
                            if ok {
                                machine.record_success();
                            } else {
                                machine.record_failure(now);
                            }
                        }
                    }
                }

                let snapshot = machine.snapshot();
                if snapshot.success_count > 0 {
                    prop_assert_eq!(snapshot.state, CircuitState::HalfOpen);
                }
                prop_assert_eq!(
                    snapshot.next_attempt_at.is_some(),
                    snapshot.state == CircuitState::Open
                );
                if snapshot.state == CircuitState::Closed {
                    prop_assert!(snapshot.failure_count < failures);
                }
            }
        }

        #[test]
        fn prop_rejects_until_timeout(failures in 1u32..6, wait in 0u64..=10) {
            let mut machine = BreakerMachine::new(config(failures, 1));
            let t0 = Instant::now();
            for _ in 0..failures {
                machine.record_failure(t0);
            }

            let at = t0 + Duration::from_secs(wait);
            prop_assert!(!machine.admit(at).is_allowed());
            prop_assert_eq!(
                machine.admit(t0 + Duration::from_secs(10) + Duration::from_millis(1)),
                Admission::Trial
            );
        }
    }
}
