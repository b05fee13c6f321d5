use std::fmt;
use thiserror::Error;

/// Where a breaker error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// Declarative config (YAML, JSON or a built `BreakerConfig`).
    Config,
    /// A `CIRCUIT_GUARD_*` override.
    Env,
    /// A weak breaker reference whose breaker is gone.
    WeakBreaker,
}

impl ErrorOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Env => "env",
            Self::WeakBreaker => "weak_breaker",
        }
    }
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin of a configuration or usage error, plus the offending key if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    pub origin: ErrorOrigin,
    /// Dotted config key, e.g. `recovery.delay_ms`.
    pub field_path: Option<String>,
    pub details: Option<String>,
}

impl ErrorContext {
    pub fn new(origin: ErrorOrigin) -> Self {
        Self {
            origin,
            field_path: None,
            details: None,
        }
    }

    pub fn at(mut self, field_path: impl Into<String>) -> Self {
        self.field_path = Some(field_path.into());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

// Rendered as a suffix: ` [env at recovery.delay_ms: 'soon': invalid digit]`.
impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " [{}", self.origin)?;
        if let Some(field) = &self.field_path {
            write!(f, " at {}", field)?;
        }
        if let Some(details) = &self.details {
            write!(f, ": {}", details)?;
        }
        f.write_str("]")
    }
}

/// Errors raised by the breaker machinery itself.
///
/// Failures of guarded calls never show up here: they are handed back to the
/// caller as their own type, untouched.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{context}")]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    /// Misuse at the call site, such as reaching for a breaker that is gone.
    #[error("Usage error: {message}{context}")]
    Usage {
        message: String,
        context: ErrorContext,
    },

    /// Root cause from the timer machinery, surfaced as-is.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub fn configuration(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn usage(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Usage {
            message: msg.into(),
            context,
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Usage { context, .. } => Some(context),
            _ => None,
        }
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, Error::Usage { .. })
    }
}
