//! Scoped acquisition of a breaker.
//!
//! A [`ScopedGuard`] is acquired from a passing breaker and released when it
//! goes out of scope, on every exit path. Failures produced inside the scope
//! are fed back to the breaker, either by letting the guard run the body
//! ([`ScopedGuard::run`]) or by passing intermediate results through
//! [`ScopedGuard::observe`], which keeps `?` usable inside the scope.

use super::circuit_breaker::Breaker;
use std::future::Future;
use tracing::trace;

/// Guarded section bound to one [`Breaker`].
///
/// ```rust
/// use circuit_guard::resilience::{Breaker, ManualRecovery};
///
/// fn fetch(breaker: &Breaker<String>) -> Result<u32, String> {
///     let guard = breaker.guard()?;
///     let raw = guard.observe(Ok::<_, String>("42"))?;
///     guard.observe(raw.parse::<u32>().map_err(|e| e.to_string()))
/// }
///
/// let breaker = Breaker::builder().with_recovery_strategy(ManualRecovery).build();
/// assert_eq!(fetch(&breaker), Ok(42));
/// ```
#[must_use = "the guarded section ends as soon as the guard is dropped"]
pub struct ScopedGuard<'a, E>
where
    E: Clone + Send + Sync + 'static,
{
    breaker: &'a Breaker<E>,
}

impl<'a, E> ScopedGuard<'a, E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Enter the guarded section. Fails with the breaker's last failure while
    /// it is blocking, before any of the caller's code runs.
    pub fn acquire(breaker: &'a Breaker<E>) -> Result<Self, E> {
        breaker.try_enter_or_reraise()?;
        let active = breaker.scope_entered();
        trace!(breaker = breaker.label(), active, "scope acquired");
        Ok(Self { breaker })
    }

    /// Run `body` inside the scope and release the guard afterwards.
    pub fn run<T, F>(self, body: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.breaker.settle(body())
    }

    /// Async counterpart of [`run`](Self::run).
    pub async fn run_async<T, Fut>(self, body: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let outcome = body.await;
        self.breaker.settle(outcome)
    }

    /// Report `result` to the breaker if it is a failure, then hand it back.
    pub fn observe<T>(&self, result: Result<T, E>) -> Result<T, E> {
        if let Err(failure) = &result {
            self.breaker.set_failure(failure.clone());
        }
        result
    }

    pub fn breaker(&self) -> &Breaker<E> {
        self.breaker
    }
}

impl<E> Drop for ScopedGuard<'_, E>
where
    E: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let active = self.breaker.scope_released();
        trace!(breaker = self.breaker.label(), active, "scope released");
    }
}

impl<E> Breaker<E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Acquire a [`ScopedGuard`] over this breaker.
    pub fn guard(&self) -> Result<ScopedGuard<'_, E>, E> {
        ScopedGuard::acquire(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{ManualRecovery, NeverTrip};
    use std::cell::Cell;

    #[derive(Debug, Clone, PartialEq)]
    struct Boom(&'static str);

    fn manual() -> Breaker<Boom> {
        Breaker::builder()
            .with_recovery_strategy(ManualRecovery)
            .build()
    }

    #[test]
    fn test_run_failure_trips_and_propagates() {
        let breaker = manual();
        let result = breaker.guard().unwrap().run(|| Err::<(), _>(Boom("down")));
        assert_eq!(result, Err(Boom("down")));
        assert!(breaker.is_blocking());
        assert_eq!(breaker.snapshot().active_scopes, 0);
    }

    #[test]
    fn test_acquire_fails_while_blocking() {
        let breaker = manual();
        breaker.set_failure(Boom("down"));
        let ran = Cell::new(false);
        let outcome = breaker.guard().and_then(|guard| {
            guard.run(|| {
                ran.set(true);
                Ok(())
            })
        });
        assert_eq!(outcome, Err(Boom("down")));
        assert!(!ran.get());
        assert_eq!(breaker.snapshot().active_scopes, 0);
    }

    #[test]
    fn test_observe_supports_question_mark() {
        fn two_steps(breaker: &Breaker<Boom>) -> Result<u32, Boom> {
            let guard = breaker.guard()?;
            let first = guard.observe(Ok(1))?;
            let second: u32 = guard.observe(Err(Boom("step two")))?;
            Ok(first + second)
        }

        let breaker = manual();
        assert_eq!(two_steps(&breaker), Err(Boom("step two")));
        assert!(breaker.is_blocking());
        assert_eq!(breaker.snapshot().active_scopes, 0);
        assert_eq!(two_steps(&breaker), Err(Boom("step two")));
    }

    #[test]
    fn test_active_scopes_tracks_nesting() {
        let breaker = manual();
        let outer = breaker.guard().unwrap();
        {
            let _inner = breaker.guard().unwrap();
            assert_eq!(breaker.snapshot().active_scopes, 2);
        }
        assert_eq!(breaker.snapshot().active_scopes, 1);
        drop(outer);
        assert_eq!(breaker.snapshot().active_scopes, 0);
    }

    #[test]
    fn test_release_on_unwind() {
        let breaker = manual();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = breaker.guard().unwrap();
            panic!("body blew up");
        }));
        assert!(result.is_err());
        assert_eq!(breaker.snapshot().active_scopes, 0);
        assert!(!breaker.is_blocking());
    }

    #[test]
    fn test_declined_failure_still_propagates() {
        let breaker = Breaker::builder()
            .with_open_strategy(NeverTrip)
            .with_recovery_strategy(ManualRecovery)
            .build();
        let result = breaker.guard().unwrap().run(|| Err::<(), _>(Boom("invalid")));
        assert_eq!(result, Err(Boom("invalid")));
        assert!(!breaker.is_blocking());
        assert!(breaker.guard().is_ok());
    }

    #[tokio::test]
    async fn test_run_async() {
        let breaker = manual();
        let value = breaker
            .guard()
            .unwrap()
            .run_async(async { Ok::<_, Boom>(7) })
            .await;
        assert_eq!(value, Ok(7));

        let failed = breaker
            .guard()
            .unwrap()
            .run_async(async { Err::<(), _>(Boom("async down")) })
            .await;
        assert_eq!(failed, Err(Boom("async down")));
        assert!(breaker.is_blocking());
    }
}
