//! Manually advanced timer source for deterministic tests and replays.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flowguard_core::time::saturating_add;

use super::{run_guarded, OnceTask, RepeatingTask, TimerHandle, TimerSource, MIN_PERIOD};

enum Task {
    Once(OnceTask),
    Repeating { period: Duration, task: RepeatingTask },
}

struct Scheduled {
    task: Task,
    cancelled: Arc<AtomicBool>,
}

struct ManualState {
    elapsed: Duration,
    next_seq: u64,
    /// Keyed by (deadline, scheduling order)
    queue: BTreeMap<(Duration, u64), Scheduled>,
}

impl ManualState {
    fn push(&mut self, deadline: Duration, scheduled: Scheduled) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.insert((deadline, seq), scheduled);
    }

    /// Deadline of the next tick of a repeating task that just ran at
    /// `deadline`, with the clock headed for `target`.
    ///
    /// Ticks missed inside one advance collapse into a single tick at the
    /// last period boundary not after `target`. `None` once the clock can no
    /// longer move past `deadline`.
    fn next_tick(deadline: Duration, period: Duration, target: Duration) -> Option<Duration> {
        let mut next = deadline.saturating_add(period);
        if next <= target {
            let missed = (target - deadline).as_nanos() / period.as_nanos();
            let offset = period.as_nanos() * missed;
            next = deadline
                + Duration::new(
                    (offset / 1_000_000_000) as u64,
                    (offset % 1_000_000_000) as u32,
                );
        }
        (next > deadline).then_some(next)
    }

    fn pop_due(&mut self, target: Duration) -> Option<(Duration, Scheduled)> {
        let (&(deadline, seq), _) = self.queue.iter().next()?;
        if deadline > target {
            return None;
        }
        let scheduled = self.queue.remove(&(deadline, seq))?;
        Some((deadline, scheduled))
    }
}

/// Virtual clock that only moves when told to.
///
/// [`advance`](ManualTimer::advance) runs every task that falls due, in
/// deadline order, with the clock set to each task's deadline while it
/// runs. Tasks run without any internal lock held, so they may schedule or
/// cancel other timers.
///
/// A repeating task fires at most twice per advance: at its first due
/// deadline and, if further ticks were missed, once more at the last period
/// boundary reached. The clock saturates instead of overflowing.
pub struct ManualTimer {
    origin: Instant,
    state: Mutex<ManualState>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(ManualState {
                elapsed: Duration::ZERO,
                next_seq: 0,
                queue: BTreeMap::new(),
            }),
        }
    }

    /// Time elapsed on this clock since creation.
    pub fn elapsed(&self) -> Duration {
        self.state.lock().elapsed
    }

    /// Move the clock forward, firing due tasks.
    pub fn advance(&self, by: Duration) {
        let target = self.state.lock().elapsed.saturating_add(by);

        loop {
            let due = {
                let mut state = self.state.lock();
                match state.pop_due(target) {
                    Some((deadline, scheduled)) => {
                        state.elapsed = state.elapsed.max(deadline);
                        Some((deadline, scheduled))
                    }
                    None => None,
                }
            };

            let Some((deadline, scheduled)) = due else {
                break;
            };
            if scheduled.cancelled.load(Ordering::SeqCst) {
                continue;
            }

            match scheduled.task {
                Task::Once(task) => run_guarded(task),
                Task::Repeating { period, task } => {
                    let tick = Arc::clone(&task);
                    run_guarded(move || tick());

                    if scheduled.cancelled.load(Ordering::SeqCst) {
                        continue;
                    }
                    if let Some(next) = ManualState::next_tick(deadline, period, target) {
                        self.state.lock().push(
                            next,
                            Scheduled {
                                task: Task::Repeating { period, task },
                                cancelled: scheduled.cancelled,
                            },
                        );
                    }
                }
            }
        }

        let mut state = self.state.lock();
        state.elapsed = state.elapsed.max(target);
    }

    /// Number of scheduled tasks not yet cancelled.
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .queue
            .values()
            .filter(|s| !s.cancelled.load(Ordering::SeqCst))
            .count()
    }

    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::new(None);
        let mut state = self.state.lock();
        let deadline = state.elapsed.saturating_add(delay);
        state.push(
            deadline,
            Scheduled {
                task,
                cancelled: handle.flag(),
            },
        );
        handle
    }
}

impl Default for ManualTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ManualTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualTimer")
            .field("elapsed", &self.elapsed())
            .field("pending", &self.pending())
            .finish()
    }
}

impl TimerSource for ManualTimer {
    fn now(&self) -> Instant {
        saturating_add(self.origin, self.elapsed())
    }

    fn schedule_once(&self, delay: Duration, task: OnceTask) -> TimerHandle {
        self.schedule(delay, Task::Once(task))
    }

    fn schedule_repeating(&self, period: Duration, task: RepeatingTask) -> TimerHandle {
        let period = period.max(MIN_PERIOD);
        self.schedule(period, Task::Repeating { period, task })
    }
}
