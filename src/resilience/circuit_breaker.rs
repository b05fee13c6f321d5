//! The breaker state machine.
//!
//! # States
//! - Passing: calls reach the collaborator
//! - Blocking: calls fail fast with the failure that tripped the breaker
//!
//! # Transitions
//! ```text
//! Passing  → Blocking: a failure the open strategy accepts
//! Blocking → Passing:  recovery strategy fires, or close_back()
//! ```
//!
//! Failures are handed back to callers as-is. A rejected call receives a clone
//! of the failure that tripped the breaker, never a breaker-specific wrapper.
//!
//! # Locking
//! The state is an atomic, read without locking on every call. Transitions
//! and the last-failure slot are serialized by one writer lock; policies live
//! in `ArcSwap`s so they can be replaced on a live breaker.

use super::open_strategy::{AnyFailure, OpenStrategy};
use super::recovery::{FixedDelay, Recoverable, RecoveryHandle, RecoveryStrategy};
use super::state::{BreakerSnapshot, BreakerState};
use crate::classify::Classify;
use crate::config::BreakerConfig;
use crate::{Error, ErrorContext, ErrorOrigin, Result};
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct Counters {
    trips: AtomicU64,
    close_backs: AtomicU64,
    rejected: AtomicU64,
    failures: AtomicU64,
    active_scopes: AtomicUsize,
}

struct Shared<E> {
    name: Option<String>,
    state: AtomicU8,
    /// Last observed failure. Always `Some` while blocking.
    last_failure: RwLock<Option<E>>,
    open: ArcSwap<Box<dyn OpenStrategy<E>>>,
    recovery: ArcSwap<Box<dyn RecoveryStrategy>>,
    counters: Counters,
}

impl<E> Shared<E> {
    fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("breaker")
    }

    fn close_back(&self) -> bool {
        self.transition_to_passing(None)
    }

    /// `generation` pins the transition to one specific trip.
    fn transition_to_passing(&self, generation: Option<u64>) -> bool {
        let _slot = self.last_failure.write();
        if let Some(generation) = generation {
            if self.counters.trips.load(Ordering::Acquire) != generation {
                debug!(
                    breaker = self.label(),
                    generation, "ignoring recovery for an earlier trip"
                );
                return false;
            }
        }
        let previous = self
            .state
            .swap(BreakerState::Passing.as_u8(), Ordering::AcqRel);
        if BreakerState::from_u8(previous) == BreakerState::Blocking {
            self.counters.close_backs.fetch_add(1, Ordering::Relaxed);
            info!(breaker = self.label(), "breaker closed back, calls pass again");
            true
        } else {
            false
        }
    }
}

impl<E: Send + Sync> Recoverable for Shared<E> {
    fn recover(&self, generation: u64) -> bool {
        self.transition_to_passing(Some(generation))
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Circuit breaker guarding calls that fail with `E`.
///
/// `Breaker` is a handle: clones share the same state machine. Failures must
/// be `Clone` because a blocking breaker hands the same failure to every
/// rejected caller.
///
/// ```rust
/// use circuit_guard::resilience::Breaker;
///
/// let breaker: Breaker<String> = Breaker::new();
/// let first: Result<(), String> = breaker.enter(|| Err("connection refused".to_string()));
/// assert_eq!(first.unwrap_err(), "connection refused");
/// assert!(breaker.is_blocking());
///
/// // The call body does not run; the trip failure comes back instead.
/// let second = breaker.enter(|| -> Result<u32, String> { unreachable!() });
/// assert_eq!(second.unwrap_err(), "connection refused");
/// ```
pub struct Breaker<E> {
    shared: Arc<Shared<E>>,
}

impl<E> Clone for Breaker<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E> fmt::Debug for Breaker<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breaker")
            .field("name", &self.shared.name)
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}

impl<E> Default for Breaker<E>
where
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Breaker<E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Breaker with the default policies: trip on any failure, recover after 200 ms.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> BreakerBuilder<E> {
        BreakerBuilder::new()
    }

    /// Run `call` unless the breaker is blocking.
    ///
    /// While blocking, returns the failure that tripped the breaker without
    /// invoking `call`. A failure from `call` is recorded through
    /// [`set_failure`](Self::set_failure) and returned unchanged.
    pub fn enter<T, F>(&self, call: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        self.try_enter_or_reraise()?;
        self.settle(call())
    }

    /// Async counterpart of [`enter`](Self::enter). The future is not polled
    /// while the breaker is blocking.
    pub async fn enter_async<T, Fut>(&self, call: Fut) -> std::result::Result<T, E>
    where
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.try_enter_or_reraise()?;
        self.settle(call.await)
    }

    pub(crate) fn settle<T>(&self, outcome: std::result::Result<T, E>) -> std::result::Result<T, E> {
        match outcome {
            Ok(value) => {
                if !self.is_blocking() {
                    self.shared.recovery.load().on_success();
                }
                Ok(value)
            }
            Err(failure) => {
                self.set_failure(failure.clone());
                Err(failure)
            }
        }
    }

    /// Gate without running anything: `Err(last failure)` while blocking.
    pub fn try_enter_or_reraise(&self) -> std::result::Result<(), E> {
        match self.rejection() {
            Some(failure) => {
                self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(breaker = self.shared.label(), "call rejected, breaker is blocking");
                Err(failure)
            }
            None => Ok(()),
        }
    }

    fn rejection(&self) -> Option<E> {
        if !self.is_blocking() {
            return None;
        }
        let slot = self.shared.last_failure.read();
        // Re-check under the lock: a close-back may have won the race.
        if self.shared.state() == BreakerState::Blocking {
            slot.clone()
        } else {
            None
        }
    }

    /// Record a failure detected outside of [`enter`](Self::enter).
    ///
    /// While passing, the failure replaces the last failure even when the
    /// open strategy declines to trip. While blocking, the failure that
    /// tripped the breaker is kept so rejected callers keep seeing it.
    pub fn set_failure(&self, failure: E) {
        self.shared.counters.failures.fetch_add(1, Ordering::Relaxed);
        let trip = self.shared.open.load().should_trip(&failure);

        let generation = {
            let mut slot = self.shared.last_failure.write();
            if self.shared.state() == BreakerState::Blocking {
                debug!(
                    breaker = self.shared.label(),
                    "failure reported while blocking, keeping trip failure"
                );
                return;
            }
            *slot = Some(failure);
            if !trip {
                debug!(
                    breaker = self.shared.label(),
                    "failure recorded, open strategy declined to trip"
                );
                return;
            }
            self.shared
                .state
                .store(BreakerState::Blocking.as_u8(), Ordering::Release);
            self.shared.counters.trips.fetch_add(1, Ordering::AcqRel) + 1
        };

        warn!(
            breaker = self.shared.label(),
            generation, "breaker tripped, failing fast until recovery"
        );
        self.schedule_recovery(generation);
    }

    fn schedule_recovery(&self, generation: u64) {
        let target: Weak<dyn Recoverable> = Arc::downgrade(&self.shared) as Weak<dyn Recoverable>;
        let handle = RecoveryHandle::new(target, generation);
        if let Err(err) = self.shared.recovery.load().schedule_recovery(handle) {
            error!(
                breaker = self.shared.label(),
                error = %err,
                "failed to schedule recovery; breaker stays blocking until closed back"
            );
        }
    }

    /// Force the breaker back to passing. Idempotent; returns whether it was blocking.
    pub fn close_back(&self) -> bool {
        self.shared.close_back()
    }

    /// Alias of [`close_back`](Self::close_back).
    pub fn switch_to_passing(&self) -> bool {
        self.close_back()
    }

    pub fn is_blocking(&self) -> bool {
        self.shared.state() == BreakerState::Blocking
    }

    pub fn state(&self) -> BreakerState {
        self.shared.state()
    }

    /// The most recent failure, kept as history after the breaker closes back.
    pub fn last_failure(&self) -> Option<E> {
        self.shared.last_failure.read().clone()
    }

    /// Swap the open strategy on a live breaker. State is kept.
    pub fn replace_open_strategy<S>(&self, strategy: S)
    where
        S: OpenStrategy<E> + 'static,
    {
        let strategy: Box<dyn OpenStrategy<E>> = Box::new(strategy);
        self.shared.open.store(Arc::new(strategy));
        debug!(breaker = self.shared.label(), "open strategy replaced");
    }

    /// Swap the recovery strategy on a live breaker. State is kept; a
    /// recovery already scheduled by the old strategy still fires.
    pub fn replace_recovery_strategy<S>(&self, strategy: S)
    where
        S: RecoveryStrategy + 'static,
    {
        let strategy: Box<dyn RecoveryStrategy> = Box::new(strategy);
        self.shared.recovery.store(Arc::new(strategy));
        debug!(breaker = self.shared.label(), "recovery strategy replaced");
    }

    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let counters = &self.shared.counters;
        let (state, has_last_failure) = {
            let slot = self.shared.last_failure.read();
            (self.shared.state(), slot.is_some())
        };
        BreakerSnapshot {
            name: self.shared.name.clone(),
            state,
            has_last_failure,
            trips: counters.trips.load(Ordering::Acquire),
            close_backs: counters.close_backs.load(Ordering::Relaxed),
            rejected_calls: counters.rejected.load(Ordering::Relaxed),
            failures_observed: counters.failures.load(Ordering::Relaxed),
            active_scopes: counters.active_scopes.load(Ordering::Relaxed),
        }
    }

    /// Non-owning reference, e.g. for callbacks that must not keep the breaker alive.
    pub fn downgrade(&self) -> WeakBreaker<E> {
        WeakBreaker {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub(crate) fn scope_entered(&self) -> usize {
        self.shared
            .counters
            .active_scopes
            .fetch_add(1, Ordering::Relaxed)
            + 1
    }

    pub(crate) fn scope_released(&self) -> usize {
        self.shared
            .counters
            .active_scopes
            .fetch_sub(1, Ordering::Relaxed)
            - 1
    }

    pub(crate) fn label(&self) -> &str {
        self.shared.label()
    }
}

impl<E> Breaker<E>
where
    E: Classify + Clone + Send + Sync + 'static,
{
    /// Build a breaker from a validated [`BreakerConfig`].
    pub fn from_config(config: &BreakerConfig) -> Result<Self> {
        config.validate()?;
        let mut builder = Self::builder()
            .with_boxed_open_strategy(config.open.build())
            .with_boxed_recovery_strategy(config.recovery.build());
        if let Some(name) = &config.name {
            builder = builder.with_name(name.clone());
        }
        Ok(builder.build())
    }
}

/// Weak reference to a [`Breaker`].
pub struct WeakBreaker<E> {
    shared: Weak<Shared<E>>,
}

impl<E> Clone for WeakBreaker<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<E> fmt::Debug for WeakBreaker<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakBreaker")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}

impl<E> WeakBreaker<E> {
    /// Get the breaker back, or a usage error if it has been dropped.
    pub fn upgrade(&self) -> Result<Breaker<E>> {
        self.shared
            .upgrade()
            .map(|shared| Breaker { shared })
            .ok_or_else(|| {
                Error::usage(
                    "breaker reference is absent",
                    ErrorContext::new(ErrorOrigin::WeakBreaker)
                        .details("the breaker was dropped before use"),
                )
            })
    }
}

/// Builder for [`Breaker`].
pub struct BreakerBuilder<E> {
    name: Option<String>,
    open: Box<dyn OpenStrategy<E>>,
    recovery: Box<dyn RecoveryStrategy>,
}

impl<E> fmt::Debug for BreakerBuilder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerBuilder")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<E> Default for BreakerBuilder<E>
where
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> BreakerBuilder<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            name: None,
            open: Box::new(AnyFailure),
            recovery: Box::new(FixedDelay::default()),
        }
    }

    /// Name used in logs and snapshots.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_open_strategy<S>(mut self, strategy: S) -> Self
    where
        S: OpenStrategy<E> + 'static,
    {
        self.open = Box::new(strategy);
        self
    }

    pub fn with_recovery_strategy<S>(mut self, strategy: S) -> Self
    where
        S: RecoveryStrategy + 'static,
    {
        self.recovery = Box::new(strategy);
        self
    }

    pub fn with_boxed_open_strategy(mut self, strategy: Box<dyn OpenStrategy<E>>) -> Self {
        self.open = strategy;
        self
    }

    pub fn with_boxed_recovery_strategy(mut self, strategy: Box<dyn RecoveryStrategy>) -> Self {
        self.recovery = strategy;
        self
    }

    pub fn build(self) -> Breaker<E> {
        Breaker {
            shared: Arc::new(Shared {
                name: self.name,
                state: AtomicU8::new(BreakerState::Passing.as_u8()),
                last_failure: RwLock::new(None),
                open: ArcSwap::from_pointee(self.open),
                recovery: ArcSwap::from_pointee(self.recovery),
                counters: Counters::default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{ManualRecovery, NeverTrip};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Boom(&'static str);

    /// Recovery double that hands out the handle instead of scheduling anything.
    #[derive(Default)]
    struct Captured {
        handles: parking_lot::Mutex<Vec<RecoveryHandle>>,
    }

    impl RecoveryStrategy for Captured {
        fn schedule_recovery(&self, handle: RecoveryHandle) -> Result<()> {
            self.handles.lock().push(handle);
            Ok(())
        }
    }

    struct FailingScheduler;

    impl RecoveryStrategy for FailingScheduler {
        fn schedule_recovery(&self, _handle: RecoveryHandle) -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::OutOfMemory, "no threads").into())
        }
    }

    fn manual() -> Breaker<Boom> {
        Breaker::builder()
            .with_recovery_strategy(ManualRecovery)
            .build()
    }

    #[test]
    fn test_initial_state() {
        let breaker = Breaker::<Boom>::new();
        assert!(!breaker.is_blocking());
        assert_eq!(breaker.state(), BreakerState::Passing);
        assert!(breaker.last_failure().is_none());
        assert!(breaker.try_enter_or_reraise().is_ok());
    }

    #[test]
    fn test_success_passes_value_through() {
        let breaker = manual();
        assert_eq!(breaker.enter(|| Ok::<_, Boom>(42)), Ok(42));
        assert!(!breaker.is_blocking());
    }

    #[test]
    fn test_failure_trips_and_rejects_with_same_failure() {
        let breaker = manual();
        assert_eq!(breaker.enter(|| Err::<(), _>(Boom("down"))), Err(Boom("down")));
        assert!(breaker.is_blocking());

        let ran = AtomicBool::new(false);
        let result = breaker.enter(|| {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(result, Err(Boom("down")));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(breaker.try_enter_or_reraise(), Err(Boom("down")));
    }

    #[test]
    fn test_declined_failure_keeps_passing() {
        let breaker = Breaker::builder()
            .with_open_strategy(NeverTrip)
            .with_recovery_strategy(ManualRecovery)
            .build();
        assert_eq!(breaker.enter(|| Err::<(), _>(Boom("meh"))), Err(Boom("meh")));
        assert!(!breaker.is_blocking());
        assert_eq!(breaker.enter(|| Ok::<_, Boom>(1)), Ok(1));
        assert_eq!(breaker.last_failure(), Some(Boom("meh")));
    }

    #[test]
    fn test_close_back_is_idempotent() {
        let breaker = manual();
        assert!(!breaker.close_back());
        breaker.set_failure(Boom("x"));
        assert!(breaker.switch_to_passing());
        assert!(!breaker.close_back());
        assert!(!breaker.is_blocking());
        // History survives the transition.
        assert_eq!(breaker.last_failure(), Some(Boom("x")));
    }

    #[test]
    fn test_failure_while_blocking_keeps_trip_failure() {
        let breaker = manual();
        breaker.set_failure(Boom("first"));
        breaker.set_failure(Boom("late"));
        assert_eq!(breaker.try_enter_or_reraise(), Err(Boom("first")));
        assert_eq!(breaker.snapshot().trips, 1);
        assert_eq!(breaker.snapshot().failures_observed, 2);
    }

    #[test]
    fn test_recovery_handle_reopens() {
        let captured = Arc::new(Captured::default());
        let breaker = Breaker::builder()
            .with_recovery_strategy(Arc::clone(&captured))
            .build();
        breaker.set_failure(Boom("down"));
        let handle = captured.handles.lock().pop().unwrap();
        assert_eq!(handle.generation(), 1);
        assert_eq!(handle.breaker_name(), None);
        assert!(handle.close_back());
        assert!(!breaker.is_blocking());
        assert_eq!(breaker.enter(|| Ok::<_, Boom>("ok")), Ok("ok"));
    }

    #[test]
    fn test_recovery_handle_reports_breaker_name() {
        let captured = Arc::new(Captured::default());
        let breaker = Breaker::builder()
            .with_name("billing")
            .with_recovery_strategy(Arc::clone(&captured))
            .build();
        breaker.set_failure(Boom("down"));
        let handle = captured.handles.lock().pop().unwrap();
        assert_eq!(handle.breaker_name().as_deref(), Some("billing"));
        drop(breaker);
        assert_eq!(handle.breaker_name(), None);
    }

    #[test]
    fn test_stale_recovery_does_not_close_a_newer_trip() {
        let captured = Arc::new(Captured::default());
        let breaker = Breaker::builder()
            .with_recovery_strategy(Arc::clone(&captured))
            .build();
        breaker.set_failure(Boom("one"));
        breaker.close_back();
        breaker.set_failure(Boom("two"));

        let mut handles = captured.handles.lock();
        let second = handles.pop().unwrap();
        let first = handles.pop().unwrap();
        assert!(!first.close_back());
        assert!(breaker.is_blocking());
        assert!(second.close_back());
        assert!(!breaker.is_blocking());
    }

    #[test]
    fn test_recovery_after_drop_is_noop() {
        let captured = Arc::new(Captured::default());
        let breaker = Breaker::builder()
            .with_recovery_strategy(Arc::clone(&captured))
            .build();
        breaker.set_failure(Boom("down"));
        drop(breaker);
        let handle = captured.handles.lock().pop().unwrap();
        assert!(!handle.close_back());
    }

    #[test]
    fn test_scheduling_failure_does_not_reach_caller() {
        let breaker = Breaker::builder()
            .with_recovery_strategy(FailingScheduler)
            .build();
        assert_eq!(breaker.enter(|| Err::<(), _>(Boom("down"))), Err(Boom("down")));
        assert!(breaker.is_blocking());
        assert!(breaker.close_back());
    }

    #[test]
    fn test_fixed_delay_recovers_without_runtime() {
        let breaker = Breaker::builder()
            .with_recovery_strategy(FixedDelay::new(Duration::from_millis(20)))
            .build();
        breaker.set_failure(Boom("down"));
        assert!(breaker.is_blocking());
        std::thread::sleep(Duration::from_millis(250));
        assert!(!breaker.is_blocking());
        assert_eq!(breaker.snapshot().close_backs, 1);
    }

    #[test]
    fn test_replace_open_strategy_keeps_state() {
        let breaker = manual();
        breaker.set_failure(Boom("down"));
        breaker.replace_open_strategy(NeverTrip);
        assert!(breaker.is_blocking());
        breaker.close_back();
        breaker.set_failure(Boom("again"));
        assert!(!breaker.is_blocking());
    }

    #[test]
    fn test_weak_breaker_upgrade() {
        let breaker = manual();
        let weak = breaker.downgrade();
        assert!(weak.upgrade().is_ok());
        drop(breaker);
        let err = weak.upgrade().unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn test_clones_share_state() {
        let breaker = manual();
        let other = breaker.clone();
        breaker.set_failure(Boom("down"));
        assert!(other.is_blocking());
    }

    #[test]
    fn test_snapshot_counts_rejections() {
        let breaker = Breaker::builder()
            .with_name("inventory")
            .with_recovery_strategy(ManualRecovery)
            .build();
        breaker.set_failure(Boom("down"));
        let _ = breaker.enter(|| Ok::<_, Boom>(()));
        let _ = breaker.try_enter_or_reraise();
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.name.as_deref(), Some("inventory"));
        assert_eq!(snapshot.state, BreakerState::Blocking);
        assert!(snapshot.has_last_failure);
        assert_eq!(snapshot.rejected_calls, 2);
        assert_eq!(breaker.name(), Some("inventory"));
    }

    #[tokio::test]
    async fn test_enter_async_does_not_poll_while_blocking() {
        let breaker = manual();
        let first = breaker.enter_async(async { Err::<(), _>(Boom("down")) }).await;
        assert_eq!(first, Err(Boom("down")));

        let polled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&polled);
        let second = breaker
            .enter_async(async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert_eq!(second, Err(Boom("down")));
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_default_recovery_inside_runtime() {
        let breaker = Breaker::<Boom>::new();
        breaker.set_failure(Boom("down"));
        assert!(breaker.is_blocking());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!breaker.is_blocking());
    }
}
