//! Circuit breaker: state machine, trip and recovery policies, scoped guards.
//!
//! ## Overview
//!
//! A [`Breaker`] sits in front of calls to an external collaborator. While
//! passing, calls run and their failures are shown to an [`OpenStrategy`].
//! When the strategy trips the breaker, it starts blocking: every call fails
//! fast with the failure that tripped it, and a [`RecoveryStrategy`] schedules
//! the return to passing.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Breaker`] | The state machine and its thread-safe entry points |
//! | [`OpenStrategy`] | Decides whether a failure trips the breaker |
//! | [`RecoveryStrategy`] | Schedules the return to passing |
//! | [`ScopedGuard`] | Ties a guarded section to the breaker |
//!
//! ## Built-in policies
//!
//! | Policy | Behavior |
//! |--------|----------|
//! | [`AnyFailure`] (default) | Every failure trips |
//! | [`TripOnKinds`] | Only failures of selected [`FailureKind`](crate::classify::FailureKind)s trip |
//! | [`trip_when`] | Closure predicate |
//! | [`NeverTrip`] | Record only |
//! | [`FixedDelay`] (default) | Close back after 200 ms |
//! | [`ExponentialDelay`] | Delay doubles per consecutive trip |
//! | [`ManualRecovery`] | Close back only through [`Breaker::close_back`] |
//!
//! ```rust
//! use circuit_guard::resilience::{Breaker, TripOnKinds};
//! use std::io;
//!
//! let breaker: Breaker<std::sync::Arc<io::Error>> = Breaker::builder()
//!     .with_name("ledger")
//!     .with_open_strategy(TripOnKinds::transport_only())
//!     .build();
//!
//! // Caller-side failures pass through without tripping.
//! let _ = breaker.enter(|| -> Result<(), _> {
//!     Err(io::Error::new(io::ErrorKind::InvalidInput, "bad id").into())
//! });
//! assert!(!breaker.is_blocking());
//! ```

pub mod circuit_breaker;
pub mod guard;
pub mod open_strategy;
pub mod recovery;
pub mod state;

pub use circuit_breaker::{Breaker, BreakerBuilder, WeakBreaker};
pub use guard::ScopedGuard;
pub use open_strategy::{trip_when, AnyFailure, NeverTrip, OpenStrategy, TripOnKinds, TripWhen};
pub use recovery::{
    ExponentialDelay, FixedDelay, ManualRecovery, RecoveryHandle, RecoveryStrategy, RecoveryTimer,
    DEFAULT_RECOVERY_DELAY,
};
pub use state::{BreakerSnapshot, BreakerState};
