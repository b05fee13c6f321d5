//! # circuit-guard
//!
//! A circuit breaker that fails fast with the *real* failure.
//!
//! ## Overview
//!
//! A breaker is placed in front of calls to an external collaborator (a remote
//! API, a database, a queue). It watches the failures those calls produce and,
//! once its trip policy fires, stops invoking the collaborator for a cooldown
//! period. During that period every caller receives the failure that tripped
//! the breaker, immediately, without the call running.
//!
//! ## Core Philosophy
//!
//! - **Transparent**: callers always see their own failure type, never a wrapper
//! - **Policy-driven**: when to trip and when to recover are pluggable traits
//! - **Time-driven recovery**: no half-open probing; a recovery policy reopens the breaker
//! - **Concurrent**: lock-free state reads, transitions under a single writer lock
//!
//! ## Quick Start
//!
//! ```rust
//! use circuit_guard::resilience::{Breaker, ManualRecovery};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Unreachable;
//!
//! let breaker = Breaker::builder()
//!     .with_name("inventory")
//!     .with_recovery_strategy(ManualRecovery)
//!     .build();
//!
//! assert_eq!(breaker.enter(|| Err::<(), _>(Unreachable)), Err(Unreachable));
//! assert!(breaker.is_blocking());
//!
//! // Fails fast with the same failure.
//! assert_eq!(breaker.enter(|| Ok(1)), Err(Unreachable));
//!
//! breaker.close_back();
//! assert_eq!(breaker.enter(|| Ok(1)), Ok(1));
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`resilience`] | Breaker state machine, policies and scoped guards |
//! | [`classify`] | Failure categories for category-aware trip policies |
//! | [`config`] | Declarative breaker configuration (YAML, JSON, env) |
//! | [`error`] | Errors raised by the breaker machinery itself |

pub mod classify;
pub mod config;
pub mod resilience;

pub use classify::{Classify, FailureKind};
pub use config::BreakerConfig;
pub use resilience::{
    Breaker, BreakerBuilder, BreakerSnapshot, BreakerState, OpenStrategy, RecoveryHandle,
    RecoveryStrategy, ScopedGuard, WeakBreaker,
};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, ErrorOrigin};
