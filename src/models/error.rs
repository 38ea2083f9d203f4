//! Error types for physrev.
//!
//! Epistemic taxonomy:
//! - B_i falsified: Expected failures (bad config, missing upstream store)
//! - I^B materialized: Infrastructure failures (network, rate limit, timeout)
//! - K_i violated: Internal invariant violations (bugs)
//!
//! Per-item failures (`ItemError`) are counted by the batch runner and never
//! escape a stage. Only `PipelineError` aborts a run.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for physrev.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ═══════════════════════════════════════════════════════════════════
    // B_i FALSIFIED — Belief proven wrong (expected failures)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Stage '{stage}' requires upstream store {path} which does not exist")]
    MissingUpstream { stage: String, path: PathBuf },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ═══════════════════════════════════════════════════════════════════
    // I^B MATERIALIZED — Bounded ignorance became known-bad
    // ═══════════════════════════════════════════════════════════════════
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // K_i VIOLATED — Invariant broken (bug, should not happen)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Failure of a single HTTP attempt against a model endpoint.
///
/// Carries exactly the signal the executor needs to classify it.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Unusable response: {0}")]
    Unusable(String),
}

/// How the executor reacts to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 429: cool down, then move to the next credential
    RateLimited,
    /// 400/401/403: credential or request rejected, move on immediately
    Rejected,
    /// Any other status: wait briefly and retry the same credential
    Transient,
    /// No status at all: move on immediately
    Unreachable,
    /// The endpoint answered but gave nothing usable: fail the call
    Unusable,
}

impl CallError {
    /// Classify this failure for the retry state machine.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Status { status: 429, .. } => FailureClass::RateLimited,
            Self::Status {
                status: 400 | 401 | 403,
                ..
            } => FailureClass::Rejected,
            Self::Status { .. } => FailureClass::Transient,
            Self::Network(_) | Self::Timeout(_) => FailureClass::Unreachable,
            Self::Unusable(_) => FailureClass::Unusable,
        }
    }

    /// HTTP status, if the endpoint produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failure of one logical call after the executor gave up.
#[derive(Debug, Clone, Error)]
pub enum CallFailure {
    #[error("All {credentials} credentials failed; last error: {last_error}")]
    Exhausted {
        credentials: usize,
        last_error: CallError,
    },

    #[error("Endpoint returned an unusable response: {0}")]
    Unusable(CallError),
}

/// Reason a model reply could not be turned into a structured record.
#[derive(Debug, Clone, Error)]
pub enum InterpretError {
    #[error("No JSON object found in reply")]
    NoJson,

    #[error("Reply JSON does not match the expected shape: {0}")]
    Shape(String),

    #[error("Field '{field}' = {value} outside [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Field '{0}' is empty")]
    EmptyField(String),
}

/// Failure of one work item inside a stage.
///
/// The batch runner logs and counts these, then moves on.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Call(#[from] CallFailure),

    #[error(transparent)]
    Interpret(#[from] InterpretError),

    #[error("Model returned an empty reply")]
    EmptyReply,

    #[error("No review by '{reviewer}' for problem {problem_id}")]
    MissingReview {
        reviewer: String,
        problem_id: String,
    },

    #[error("No meta-review for problem {0}")]
    MissingAggregate(String),
}

/// Result type alias for physrev.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> CallError {
        CallError::Status {
            status: code,
            message: String::new(),
        }
    }

    #[test]
    fn test_classifies_status_codes() {
        assert_eq!(status(429).class(), FailureClass::RateLimited);
        assert_eq!(status(400).class(), FailureClass::Rejected);
        assert_eq!(status(401).class(), FailureClass::Rejected);
        assert_eq!(status(403).class(), FailureClass::Rejected);
        assert_eq!(status(500).class(), FailureClass::Transient);
        assert_eq!(status(503).class(), FailureClass::Transient);
        assert_eq!(status(404).class(), FailureClass::Transient);
    }

    #[test]
    fn test_classifies_statusless_failures() {
        assert_eq!(
            CallError::Network("connection refused".into()).class(),
            FailureClass::Unreachable
        );
        assert_eq!(
            CallError::Timeout(Duration::from_secs(180)).class(),
            FailureClass::Unreachable
        );
        assert_eq!(
            CallError::Unusable("no choices".into()).class(),
            FailureClass::Unusable
        );
        assert_eq!(CallError::Network("x".into()).status(), None);
    }
}
