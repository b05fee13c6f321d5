//! Shared fixtures for integration tests

#![allow(dead_code)]

use circuit_guard::{Classify, FailureKind};
use std::sync::Once;
use std::time::{Duration, Instant};

static TRACING: Once = Once::new();

/// Install a subscriber when `RUST_LOG` is set, so breaker logs show up with `--nocapture`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        }
    });
}

/// Failure raised by the fake remote service used across the tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    Transport(String),
    Validation(String),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Transport(msg) => write!(f, "transport: {}", msg),
            ServiceError::Validation(msg) => write!(f, "validation: {}", msg),
        }
    }
}

impl std::error::Error for ServiceError {}

impl Classify for ServiceError {
    fn kind(&self) -> FailureKind {
        match self {
            ServiceError::Transport(_) => FailureKind::Transport,
            ServiceError::Validation(_) => FailureKind::Validation,
        }
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
