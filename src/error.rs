//! Engine errors
//!
//! | Variant | Code | Catchable | Fatal |
//! |---------|------|-----------|-------|
//! | [`TokenError::Uncaught`] | `ORC_UNCAUGHT` | Yes | No |
//! | [`TokenError::StackLimit`] | `ORC_STACK_LIMIT` | No | No |
//! | [`TokenError::TokenLimit`] | `ORC_TOKEN_LIMIT` | No | No |
//! | [`TokenError::NotCallable`] | `ORC_NOT_CALLABLE` | Yes | No |
//! | [`TokenError::ArityMismatch`] | `ORC_ARITY_MISMATCH` | Yes | No |
//! | [`TokenError::TypeMismatch`] | `ORC_TYPE_MISMATCH` | Yes | No |
//! | [`TokenError::Site`] | `ORC_SITE` | Yes | No |
//! | [`TokenError::Capability`] | `ORC_CAPABILITY` | Yes | No |
//! | [`TokenError::UnboundVariable`] | `ORC_UNBOUND_VARIABLE` | No | Yes |
//! | [`TokenError::Internal`] | `ORC_INTERNAL` | No | Yes |
//!
//! Catchable errors become exception values a handler can receive.
//! Resource limits kill the token and are reported. Fatal errors stop the
//! engine.

use crate::value::{SourceLocation, Value};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A failure attributed to a single token.
#[derive(Debug, Clone, Error)]
pub enum TokenError {
    /// A thrown value reached the top of the handler stack.
    #[error("uncaught exception: {0}")]
    Uncaught(Value),

    #[error("stack depth limit of {limit} exceeded")]
    StackLimit { limit: usize },

    #[error("token limit of {limit} exceeded")]
    TokenLimit { limit: usize },

    #[error("value {0} is not callable")]
    NotCallable(Value),

    #[error("arity mismatch: expected {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },

    /// Reported by a site through its resumer.
    #[error("site {site} failed: {message}")]
    Site { site: String, message: String },

    #[error("capability '{0}' is not granted")]
    Capability(String),

    #[error("unbound variable #{0}")]
    UnboundVariable(usize),

    #[error("internal engine error: {0}")]
    Internal(String),
}

impl TokenError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Uncaught(_) => "ORC_UNCAUGHT",
            Self::StackLimit { .. } => "ORC_STACK_LIMIT",
            Self::TokenLimit { .. } => "ORC_TOKEN_LIMIT",
            Self::NotCallable(_) => "ORC_NOT_CALLABLE",
            Self::ArityMismatch { .. } => "ORC_ARITY_MISMATCH",
            Self::TypeMismatch { .. } => "ORC_TYPE_MISMATCH",
            Self::Site { .. } => "ORC_SITE",
            Self::Capability(_) => "ORC_CAPABILITY",
            Self::UnboundVariable(_) => "ORC_UNBOUND_VARIABLE",
            Self::Internal(_) => "ORC_INTERNAL",
        }
    }

    /// Whether a handler may intercept this error.
    pub fn is_catchable(&self) -> bool {
        matches!(
            self,
            Self::Uncaught(_)
                | Self::NotCallable(_)
                | Self::ArityMismatch { .. }
                | Self::TypeMismatch { .. }
                | Self::Site { .. }
                | Self::Capability(_)
        )
    }

    /// Whether the error means the engine itself is broken.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnboundVariable(_) | Self::Internal(_))
    }

    pub fn type_mismatch(expected: &'static str, got: &Value) -> Self {
        Self::TypeMismatch {
            expected,
            got: got.kind(),
        }
    }

    pub fn site(site: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Site {
            site: site.into(),
            message: message.into(),
        }
    }
}

/// An error together with where it happened.
///
/// The location and backtrace are those of the first throw, even when the
/// error was re-raised further up the handler chain.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub error: TokenError,
    pub location: Option<SourceLocation>,
    pub backtrace: Vec<SourceLocation>,
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.error)?;
        if let Some(loc) = &self.location {
            write!(f, " at {loc}")?;
        }
        if !self.backtrace.is_empty() {
            write!(f, "\nBacktrace:")?;
            for loc in &self.backtrace {
                write!(f, "\n  {loc}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ErrorReport {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Driver-level failures returned by [`crate::Engine::run`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine has already run")]
    AlreadyStarted,

    #[error("engine aborted: {0}")]
    Fatal(Box<ErrorReport>),

    /// No runnable work, no pending calls and the root region is still open.
    #[error("engine stalled with {live_tokens} live tokens")]
    Stalled { live_tokens: usize },

    #[error("internal engine error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for environment variable '{name}': {message}")]
    InvalidEnvVar { name: String, message: String },
}

impl ConfigError {
    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(TokenError::Uncaught(Value::Int(1)).is_catchable());
        assert!(!TokenError::StackLimit { limit: 3 }.is_catchable());
        assert!(!TokenError::StackLimit { limit: 3 }.is_fatal());
        assert!(TokenError::Internal("x".into()).is_fatal());
        assert_eq!(TokenError::Capability("net".into()).code(), "ORC_CAPABILITY");
    }

    #[test]
    fn report_display_lists_backtrace() {
        let report = ErrorReport {
            error: TokenError::Uncaught(Value::str("boom")),
            location: Some(SourceLocation::new("a.orc", 4, 1)),
            backtrace: vec![
                SourceLocation::new("a.orc", 4, 1),
                SourceLocation::new("a.orc", 9, 3),
            ],
        };
        let text = report.to_string();
        assert!(text.starts_with("Error: uncaught exception: \"boom\" at a.orc:4:1"));
        assert!(text.contains("Backtrace:\n  a.orc:4:1\n  a.orc:9:3"));
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::invalid_env_var("ORC_STACK_LIMIT", "expected integer");
        assert!(err.to_string().contains("ORC_STACK_LIMIT"));
        assert!(err.to_string().contains("expected integer"));
    }
}
