use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Coarse classification of a failed model call.
///
/// Only used for diagnostics: every kind is retried the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Connection,
    Authentication,
    RateLimit,
    ServerError,
    Unknown,
}

impl FailureKind {
    /// Classify an error message by looking for well-known substrings.
    pub fn classify(message: &str) -> Self {
        let message = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

        if has(&["timeout", "timed out", "deadline"]) {
            FailureKind::Timeout
        } else if has(&["connection", "connect", "dns", "network", "unreachable"]) {
            FailureKind::Connection
        } else if has(&["401", "403", "unauthorized", "forbidden", "authentication", "api key"]) {
            FailureKind::Authentication
        } else if has(&["429", "rate limit", "rate_limit", "too many requests", "quota"]) {
            FailureKind::RateLimit
        } else if has(&["500", "502", "503", "504", "server error", "bad gateway", "unavailable"]) {
            FailureKind::ServerError
        } else {
            FailureKind::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Connection => "connection",
            FailureKind::Authentication => "authentication",
            FailureKind::RateLimit => "rate_limit",
            FailureKind::ServerError => "server_error",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone)]
pub enum AssistError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model call failed ({kind}): {message}")]
    Gateway { kind: FailureKind, message: String },

    #[error("Could not parse model output: {0}")]
    Parse(String),

    #[error("Image classification failed: {0}")]
    Classification(String),
}

impl AssistError {
    /// Build a gateway error, classifying it from its message.
    pub fn gateway(message: impl Into<String>) -> Self {
        let message = message.into();
        AssistError::Gateway {
            kind: FailureKind::classify(&message),
            message,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AssistError::Validation(_))
    }

    /// Short machine-readable tag for logs and failure reports.
    pub fn kind_label(&self) -> &'static str {
        match self {
            AssistError::Validation(_) => "validation",
            AssistError::Config(_) => "config",
            AssistError::Gateway { kind, .. } => kind.as_str(),
            AssistError::Parse(_) => "parse",
            AssistError::Classification(_) => "classification",
        }
    }
}

pub type Result<T> = std::result::Result<T, AssistError>;
