use serde::{Deserialize, Serialize};
use std::fmt;

/// The two states of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow through to the collaborator.
    #[default]
    Passing,
    /// Calls are rejected with the failure that tripped the breaker.
    Blocking,
}

impl BreakerState {
    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            BreakerState::Passing => 0,
            BreakerState::Blocking => 1,
        }
    }

    pub(crate) const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => BreakerState::Passing,
            _ => BreakerState::Blocking,
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Passing => f.write_str("passing"),
            BreakerState::Blocking => f.write_str("blocking"),
        }
    }
}

/// Point-in-time view of a breaker, for dashboards and health endpoints.
///
/// Facts only; counters are monotonic over the breaker's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub name: Option<String>,
    pub state: BreakerState,
    /// Whether a failure has ever been recorded (it is never cleared).
    pub has_last_failure: bool,
    pub trips: u64,
    pub close_backs: u64,
    /// Calls rejected without running because the breaker was blocking.
    pub rejected_calls: u64,
    /// Failures reported to the breaker, tripping or not.
    pub failures_observed: u64,
    /// Scoped guards currently held.
    pub active_scopes: usize,
}
