//! Trip policies: decide whether an observed failure opens the breaker.

use crate::classify::{Classify, FailureKind};
use std::collections::HashSet;
use std::sync::Arc;

/// Decides whether a failure should trip the breaker.
///
/// Implementations must be pure: the breaker may consult them from any thread
/// and does not hold its lock while doing so.
pub trait OpenStrategy<E>: Send + Sync {
    fn should_trip(&self, failure: &E) -> bool;
}

impl<E, S> OpenStrategy<E> for Arc<S>
where
    S: OpenStrategy<E> + ?Sized,
{
    fn should_trip(&self, failure: &E) -> bool {
        (**self).should_trip(failure)
    }
}

impl<E, S> OpenStrategy<E> for Box<S>
where
    S: OpenStrategy<E> + ?Sized,
{
    fn should_trip(&self, failure: &E) -> bool {
        (**self).should_trip(failure)
    }
}

/// Default policy: every failure trips.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyFailure;

impl<E> OpenStrategy<E> for AnyFailure {
    fn should_trip(&self, _failure: &E) -> bool {
        true
    }
}

/// Never trips. Failures are still recorded and handed back to callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverTrip;

impl<E> OpenStrategy<E> for NeverTrip {
    fn should_trip(&self, _failure: &E) -> bool {
        false
    }
}

/// Trips only on failures of the configured [`FailureKind`]s.
#[derive(Debug, Clone)]
pub struct TripOnKinds {
    kinds: HashSet<FailureKind>,
}

impl TripOnKinds {
    pub fn new(kinds: impl IntoIterator<Item = FailureKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    /// Only transport failures (refused, reset, broken pipe...) trip.
    pub fn transport_only() -> Self {
        Self::new([FailureKind::Transport])
    }

    /// Failures pointing at the collaborator trip; caller-side ones don't.
    pub fn external() -> Self {
        Self::new([
            FailureKind::Transport,
            FailureKind::Timeout,
            FailureKind::Overloaded,
        ])
    }

    pub fn kinds(&self) -> impl Iterator<Item = FailureKind> + '_ {
        self.kinds.iter().copied()
    }
}

impl<E: Classify> OpenStrategy<E> for TripOnKinds {
    fn should_trip(&self, failure: &E) -> bool {
        self.kinds.contains(&failure.kind())
    }
}

/// Adapter turning a predicate closure into an [`OpenStrategy`].
#[derive(Clone)]
pub struct TripWhen<F> {
    predicate: F,
}

/// Builds an [`OpenStrategy`] from a closure.
///
/// ```rust
/// use circuit_guard::resilience::{trip_when, Breaker};
///
/// let breaker: Breaker<String> = Breaker::builder()
///     .with_open_strategy(trip_when(|e: &String| e.starts_with("net:")))
///     .build();
/// assert!(!breaker.is_blocking());
/// ```
pub fn trip_when<E, F>(predicate: F) -> TripWhen<F>
where
    F: Fn(&E) -> bool + Send + Sync,
{
    TripWhen { predicate }
}

impl<E, F> OpenStrategy<E> for TripWhen<F>
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn should_trip(&self, failure: &E) -> bool {
        (self.predicate)(failure)
    }
}
