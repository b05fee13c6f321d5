//! Recovery policies: schedule the breaker's return to passing after a trip.
//!
//! Scheduling is fire-and-forget. A strategy hands a [`RecoveryHandle`] to a
//! [`RecoveryTimer`] and returns immediately; the triggering call never waits
//! on it. The handle only holds a weak reference, so a breaker dropped before
//! the timer fires turns the callback into a no-op.

use crate::Result;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// Default delay before a tripped breaker closes back.
pub const DEFAULT_RECOVERY_DELAY: Duration = Duration::from_millis(200);

/// The side of a breaker a recovery callback is allowed to touch.
pub(crate) trait Recoverable: Send + Sync {
    /// Close back if the breaker is still in the trip identified by `generation`.
    fn recover(&self, generation: u64) -> bool;
    fn name(&self) -> Option<&str>;
}

/// Capability to switch one specific trip of a breaker back to passing.
///
/// Stale handles are harmless: if the breaker was closed back and tripped
/// again in the meantime, or dropped altogether, [`close_back`](Self::close_back)
/// does nothing.
#[derive(Clone)]
pub struct RecoveryHandle {
    target: Weak<dyn Recoverable>,
    generation: u64,
}

impl RecoveryHandle {
    pub(crate) fn new(target: Weak<dyn Recoverable>, generation: u64) -> Self {
        Self { target, generation }
    }

    /// Switch the breaker back to passing. Returns whether a transition happened.
    pub fn close_back(&self) -> bool {
        match self.target.upgrade() {
            Some(breaker) => breaker.recover(self.generation),
            None => {
                trace!("recovery fired after breaker was dropped");
                false
            }
        }
    }

    /// Whether the breaker behind this handle still exists.
    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// Which trip this handle belongs to (1 for the first trip).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Name of the breaker, or `None` if it is unnamed or gone.
    pub fn breaker_name(&self) -> Option<String> {
        self.target
            .upgrade()
            .and_then(|breaker| breaker.name().map(str::to_string))
    }
}

impl std::fmt::Debug for RecoveryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryHandle")
            .field("generation", &self.generation)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Schedules the return to passing once the breaker trips.
///
/// `schedule_recovery` must not block. Errors describe a failure of the
/// scheduling mechanism itself and must carry its root cause.
pub trait RecoveryStrategy: Send + Sync {
    fn schedule_recovery(&self, handle: RecoveryHandle) -> Result<()>;

    /// Called after a guarded call completes successfully while passing.
    fn on_success(&self) {}
}

impl<S> RecoveryStrategy for Arc<S>
where
    S: RecoveryStrategy + ?Sized,
{
    fn schedule_recovery(&self, handle: RecoveryHandle) -> Result<()> {
        (**self).schedule_recovery(handle)
    }

    fn on_success(&self) {
        (**self).on_success()
    }
}

impl<S> RecoveryStrategy for Box<S>
where
    S: RecoveryStrategy + ?Sized,
{
    fn schedule_recovery(&self, handle: RecoveryHandle) -> Result<()> {
        (**self).schedule_recovery(handle)
    }

    fn on_success(&self) {
        (**self).on_success()
    }
}

/// Delayed, fire-and-forget execution of a recovery action.
///
/// Inside a tokio runtime the action runs on a spawned task; elsewhere a
/// short-lived named thread sleeps and then runs it. A task cancelled by a
/// runtime shutdown hands the rest of its delay over to such a thread, so the
/// action still runs exactly once.
#[derive(Debug, Clone)]
pub struct RecoveryTimer {
    thread_name: String,
}

impl Default for RecoveryTimer {
    fn default() -> Self {
        Self {
            thread_name: "circuit-guard-recovery".to_string(),
        }
    }
}

impl RecoveryTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Run `action` once `delay` has elapsed. Never waits for it.
    pub fn spawn_after<F>(&self, delay: Duration, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let mut pending = PendingAction {
                action: Some(action),
                deadline: Instant::now() + delay,
                thread_name: self.thread_name.clone(),
            };
            runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                pending.fire();
            });
            return Ok(());
        }

        spawn_timer_thread(&self.thread_name, delay, action)?;
        Ok(())
    }
}

fn spawn_timer_thread<F>(name: &str, delay: Duration, action: F) -> std::io::Result<()>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            std::thread::sleep(delay);
            action();
        })?;
    Ok(())
}

/// Action owned by a runtime task. Dropped unfired means the task was cancelled.
struct PendingAction<F: FnOnce() + Send + 'static> {
    action: Option<F>,
    deadline: Instant,
    thread_name: String,
}

impl<F: FnOnce() + Send + 'static> PendingAction<F> {
    fn fire(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

impl<F: FnOnce() + Send + 'static> Drop for PendingAction<F> {
    fn drop(&mut self) {
        let Some(action) = self.action.take() else {
            return;
        };
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        debug!(
            remaining_ms = remaining.as_millis() as u64,
            "runtime dropped a pending recovery, moving it to a timer thread"
        );
        if let Err(err) = spawn_timer_thread(&self.thread_name, remaining, action) {
            error!(error = %err, "failed to move pending recovery off a stopped runtime");
        }
    }
}

/// Closes the breaker back after a fixed delay (200 ms by default).
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    timer: RecoveryTimer,
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::new(DEFAULT_RECOVERY_DELAY)
    }
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timer: RecoveryTimer::default(),
        }
    }

    pub fn with_timer(mut self, timer: RecoveryTimer) -> Self {
        self.timer = timer;
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl RecoveryStrategy for FixedDelay {
    fn schedule_recovery(&self, handle: RecoveryHandle) -> Result<()> {
        debug!(
            delay_ms = self.delay.as_millis() as u64,
            generation = handle.generation(),
            "scheduling recovery"
        );
        self.timer.spawn_after(self.delay, move || {
            handle.close_back();
        })
    }
}

/// Doubles the delay on every consecutive trip, up to `max`.
///
/// The streak resets once a guarded call succeeds again.
#[derive(Debug)]
pub struct ExponentialDelay {
    initial: Duration,
    max: Duration,
    consecutive_trips: AtomicU32,
    timer: RecoveryTimer,
}

impl ExponentialDelay {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            consecutive_trips: AtomicU32::new(0),
            timer: RecoveryTimer::default(),
        }
    }

    pub fn with_timer(mut self, timer: RecoveryTimer) -> Self {
        self.timer = timer;
        self
    }

    /// Delay used for the given zero-based trip streak position.
    pub fn delay_for_trip(&self, streak: u32) -> Duration {
        let factor = 1u32.checked_shl(streak.min(31)).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    pub fn consecutive_trips(&self) -> u32 {
        self.consecutive_trips.load(Ordering::Acquire)
    }
}

impl RecoveryStrategy for ExponentialDelay {
    fn schedule_recovery(&self, handle: RecoveryHandle) -> Result<()> {
        let streak = self
            .consecutive_trips
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_add(1))
            })
            .unwrap_or_else(|n| n);
        let delay = self.delay_for_trip(streak);
        debug!(
            delay_ms = delay.as_millis() as u64,
            streak,
            generation = handle.generation(),
            "scheduling recovery"
        );
        self.timer.spawn_after(delay, move || {
            handle.close_back();
        })
    }

    fn on_success(&self) {
        self.consecutive_trips.store(0, Ordering::Release);
    }
}

/// Schedules nothing; the breaker stays blocking until closed back by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualRecovery;

impl RecoveryStrategy for ManualRecovery {
    fn schedule_recovery(&self, handle: RecoveryHandle) -> Result<()> {
        debug!(
            generation = handle.generation(),
            "manual recovery: waiting for explicit close_back"
        );
        Ok(())
    }
}
