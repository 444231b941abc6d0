use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Classification of a node failure, deciding retry eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
    RateLimit,
    Validation,
}

impl ErrorKind {
    /// Transient and rate-limit failures may be retried by default.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::RateLimit)
    }
}

/// Structured node-level error carried through results and logs.
///
/// Errors are values, not panics: handlers classify underlying failures
/// into a stable `code` plus an [`ErrorKind`], and the engine decides
/// retry and propagation from there.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct NodeError {
    pub code: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl NodeError {
    pub fn new(code: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        NodeError {
            code: code.into(),
            message: message.into(),
            kind,
            details: None,
        }
    }

    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, ErrorKind::Transient, message)
    }

    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, ErrorKind::Permanent, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new("rate_limit", ErrorKind::RateLimit, message)
    }

    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, ErrorKind::Validation, message)
    }

    /// Node execution exceeded its deadline. Classified transient.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new("node_timeout", ErrorKind::Transient, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::permanent("serialization_error", e.to_string())
    }
}
