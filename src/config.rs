//! Breaker configuration
//!
//! Policies can be described declaratively (YAML/JSON or environment) and
//! turned into a [`Breaker`](crate::resilience::Breaker) with
//! [`Breaker::from_config`](crate::resilience::Breaker::from_config).
//!
//! ```yaml
//! name: payments
//! open:
//!   trip_on: [transport, timeout]   # or "any", or a single kind
//! recovery:
//!   strategy: exponential
//!   delay_ms: 200
//!   max_delay_ms: 5000
//! ```
//!
//! Environment overrides:
//! - `CIRCUIT_GUARD_NAME`
//! - `CIRCUIT_GUARD_TRIP_ON` (comma-separated kinds, or `any`)
//! - `CIRCUIT_GUARD_RECOVERY` (`fixed`, `exponential`, `manual`)
//! - `CIRCUIT_GUARD_DELAY_MS` (default 200)
//! - `CIRCUIT_GUARD_MAX_DELAY_MS`

use crate::classify::{Classify, FailureKind};
use crate::resilience::{
    AnyFailure, ExponentialDelay, FixedDelay, ManualRecovery, OpenStrategy, RecoveryStrategy,
    TripOnKinds,
};
use crate::{Error, ErrorContext, ErrorOrigin, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENV_NAME: &str = "CIRCUIT_GUARD_NAME";
pub const ENV_TRIP_ON: &str = "CIRCUIT_GUARD_TRIP_ON";
pub const ENV_RECOVERY: &str = "CIRCUIT_GUARD_RECOVERY";
pub const ENV_DELAY_MS: &str = "CIRCUIT_GUARD_DELAY_MS";
pub const ENV_MAX_DELAY_MS: &str = "CIRCUIT_GUARD_MAX_DELAY_MS";

const DEFAULT_DELAY_MS: u64 = 200;
/// Cap used by the exponential strategy when no `max_delay_ms` is given.
const DEFAULT_BACKOFF_FACTOR_CAP: u64 = 32;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub open: OpenConfig,
    pub recovery: RecoveryConfig,
}

/// When to trip. An empty `trip_on` means any failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenConfig {
    #[serde(deserialize_with = "deserialize_trip_on")]
    pub trip_on: Vec<FailureKind>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryKind {
    #[default]
    Fixed,
    Exponential,
    Manual,
}

impl RecoveryKind {
    fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "fixed" => Some(Self::Fixed),
            "exponential" | "backoff" => Some(Self::Exponential),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub strategy: RecoveryKind,
    pub delay_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            strategy: RecoveryKind::Fixed,
            delay_ms: DEFAULT_DELAY_MS,
            max_delay_ms: None,
        }
    }
}

fn deserialize_trip_on<'de, D>(deserializer: D) -> std::result::Result<Vec<FailureKind>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Input {
        // Shorthand: trip_on: transport
        One(String),
        Many(Vec<FailureKind>),
    }

    match Input::deserialize(deserializer)? {
        Input::Many(kinds) => Ok(kinds),
        Input::One(name) => parse_kinds(&name).map_err(serde::de::Error::custom),
    }
}

fn parse_kinds(raw: &str) -> std::result::Result<Vec<FailureKind>, String> {
    if raw.trim().eq_ignore_ascii_case("any") {
        return Ok(Vec::new());
    }
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| FailureKind::from_name(s).ok_or_else(|| format!("unknown failure kind '{}'", s)))
        .collect()
}

impl BreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `CIRCUIT_GUARD_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (environment, CLI, tests).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup(ENV_NAME).filter(|s| !s.trim().is_empty()) {
            self.name = Some(name.trim().to_string());
        }
        if let Some(raw) = lookup(ENV_TRIP_ON) {
            self.open.trip_on = parse_kinds(&raw)
                .map_err(|e| env_error(ENV_TRIP_ON, "open.trip_on", e))?;
        }
        if let Some(raw) = lookup(ENV_RECOVERY) {
            self.recovery.strategy = RecoveryKind::from_name(&raw).ok_or_else(|| {
                env_error(
                    ENV_RECOVERY,
                    "recovery.strategy",
                    format!("expected fixed, exponential or manual, got '{}'", raw),
                )
            })?;
        }
        if let Some(raw) = lookup(ENV_DELAY_MS) {
            self.recovery.delay_ms = parse_millis(ENV_DELAY_MS, "recovery.delay_ms", &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_DELAY_MS) {
            self.recovery.max_delay_ms =
                Some(parse_millis(ENV_MAX_DELAY_MS, "recovery.max_delay_ms", &raw)?);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_trip_on(mut self, kinds: impl IntoIterator<Item = FailureKind>) -> Self {
        self.open.trip_on = kinds.into_iter().collect();
        self
    }

    pub fn with_recovery(mut self, strategy: RecoveryKind, delay: Duration) -> Self {
        self.recovery.strategy = strategy;
        self.recovery.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.recovery.max_delay_ms = Some(max.as_millis() as u64);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(invalid("name", "breaker name must not be blank"));
            }
        }
        self.recovery.validate()
    }
}

impl OpenConfig {
    pub fn build<E>(&self) -> Box<dyn OpenStrategy<E>>
    where
        E: Classify + 'static,
    {
        if self.trip_on.is_empty() {
            Box::new(AnyFailure)
        } else {
            Box::new(TripOnKinds::new(self.trip_on.iter().copied()))
        }
    }
}

impl RecoveryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        let max_ms = self
            .max_delay_ms
            .unwrap_or_else(|| self.delay_ms.saturating_mul(DEFAULT_BACKOFF_FACTOR_CAP));
        Duration::from_millis(max_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.strategy == RecoveryKind::Manual {
            return Ok(());
        }
        if self.delay_ms == 0 {
            return Err(invalid(
                "recovery.delay_ms",
                "recovery delay must be greater than zero",
            ));
        }
        if let Some(max) = self.max_delay_ms {
            if max < self.delay_ms {
                return Err(invalid(
                    "recovery.max_delay_ms",
                    format!("max_delay_ms ({}) is below delay_ms ({})", max, self.delay_ms),
                ));
            }
        }
        Ok(())
    }

    pub fn build(&self) -> Box<dyn RecoveryStrategy> {
        match self.strategy {
            RecoveryKind::Fixed => Box::new(FixedDelay::new(self.delay())),
            RecoveryKind::Exponential => {
                Box::new(ExponentialDelay::new(self.delay(), self.max_delay()))
            }
            RecoveryKind::Manual => Box::new(ManualRecovery),
        }
    }
}

fn invalid(field: &str, msg: impl Into<String>) -> Error {
    Error::configuration(msg, ErrorContext::new(ErrorOrigin::Config).at(field))
}

fn env_error(var: &str, field: &str, details: impl Into<String>) -> Error {
    Error::configuration(
        format!("invalid value in {}", var),
        ErrorContext::new(ErrorOrigin::Env).at(field).details(details),
    )
}

fn parse_millis(var: &str, field: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| env_error(var, field, format!("'{}': {}", raw, e)))
}
