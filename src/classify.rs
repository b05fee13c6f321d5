//! Failure categories used by category-aware open strategies.
//!
//! A breaker usually cares about *where* a failure came from: a refused
//! connection says the collaborator is struggling, a rejected payload says the
//! caller sent garbage. [`Classify`] lets a failure type report its
//! [`FailureKind`] so [`TripOnKinds`](crate::resilience::TripOnKinds) can trip on
//! the former and let the latter pass through.
//!
//! | Kind         | Typical origin                               |
//! |--------------|----------------------------------------------|
//! | `transport`  | connection refused/reset, broken pipe        |
//! | `timeout`    | deadline elapsed waiting for the collaborator |
//! | `overloaded` | collaborator shedding load                   |
//! | `validation` | malformed input, rejected by the caller side |
//! | `unknown`    | anything unclassified                        |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::sync::Arc;

/// Coarse failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Timeout,
    Overloaded,
    Validation,
    Unknown,
}

impl FailureKind {
    /// Returns the standard name (e.g., `"transport"`).
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Overloaded => "overloaded",
            Self::Validation => "validation",
            Self::Unknown => "unknown",
        }
    }

    /// Parses a standard name. Accepts a few common aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name.trim().to_ascii_lowercase().as_str() {
            "transport" | "network" | "connection" => Self::Transport,
            "timeout" | "timed_out" => Self::Timeout,
            "overloaded" | "unavailable" => Self::Overloaded,
            "validation" | "invalid_input" | "invalid_data" => Self::Validation,
            "unknown" | "other" => Self::Unknown,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether this kind points at the collaborator rather than the caller.
    #[inline]
    pub fn is_external(&self) -> bool {
        matches!(self, Self::Transport | Self::Timeout | Self::Overloaded)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure types that can report their [`FailureKind`].
pub trait Classify {
    fn kind(&self) -> FailureKind;
}

impl Classify for io::Error {
    fn kind(&self) -> FailureKind {
        use io::ErrorKind::*;
        match io::Error::kind(self) {
            ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected
            | AddrInUse | AddrNotAvailable | BrokenPipe | UnexpectedEof => FailureKind::Transport,
            TimedOut | WouldBlock => FailureKind::Timeout,
            OutOfMemory => FailureKind::Overloaded,
            InvalidInput | InvalidData => FailureKind::Validation,
            _ => FailureKind::Unknown,
        }
    }
}

impl<T: Classify + ?Sized> Classify for Arc<T> {
    fn kind(&self) -> FailureKind {
        (**self).kind()
    }
}

impl<T: Classify + ?Sized> Classify for Box<T> {
    fn kind(&self) -> FailureKind {
        (**self).kind()
    }
}
