//! Error taxonomy shared by every Rookery subsystem.
//!
//! Each failure the core surfaces carries a [`ErrorKind`] drawn from a closed
//! taxonomy, a message, and a retryability flag. Dispatch-layer kinds
//! (`Busy`, `Timeout`, `Bus`) are recovered locally by retry; everything else
//! propagates to the task's terminal state and the lifecycle topic.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Closed taxonomy of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Malformed input: unknown capability, empty description, cyclic
    /// dependency, duplicate id.
    Validation,
    /// Unknown task, agent, type, or session.
    NotFound,
    /// Operation forbidden in the current state.
    State,
    /// Resource temporarily unavailable; retried internally.
    Busy,
    /// Dispatch or request deadline elapsed.
    Timeout,
    /// Bus delivery failure.
    Bus,
    /// The agent returned a structured failure.
    Agent,
    /// Cancellation requested. Terminal.
    Cancelled,
    /// Consensus strategy could not produce a decision.
    NoConsensus,
    /// A decomposition pattern produced an invalid template.
    Pattern,
    /// The decomposer could not produce a valid plan.
    Decomposition,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation-error",
            ErrorKind::NotFound => "not-found",
            ErrorKind::State => "state-error",
            ErrorKind::Busy => "busy",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Bus => "bus-error",
            ErrorKind::Agent => "agent-error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::NoConsensus => "no-consensus",
            ErrorKind::Pattern => "pattern-error",
            ErrorKind::Decomposition => "decomposition-error",
        };
        f.write_str(s)
    }
}

/// Unified error type for core operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum CoreError {
    /// Malformed input; reported, never retried.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Unknown task / agent / type / session.
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation forbidden in the current state.
    #[error("invalid state: {0}")]
    State(String),
    /// Resource temporarily unavailable (all agents full).
    #[error("busy: {0}")]
    Busy(String),
    /// Dispatch or request deadline elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Bus delivery failure.
    #[error("bus delivery failed: {0}")]
    Bus(String),
    /// The agent returned a structured failure.
    #[error("agent failure: {message}")]
    Agent {
        /// Failure text reported by the agent.
        message: String,
        /// Whether the agent marked the failure retryable.
        retryable: bool,
    },
    /// Cancellation requested.
    #[error("cancelled: {0}")]
    Cancelled(String),
    /// No consensus strategy outcome.
    #[error("no consensus: {0}")]
    NoConsensus(String),
    /// Invalid decomposition pattern.
    #[error("pattern error: {0}")]
    Pattern(String),
    /// Decomposition could not produce a valid plan.
    #[error("decomposition error: {0}")]
    Decomposition(String),
}

impl CoreError {
    /// The taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::State(_) => ErrorKind::State,
            CoreError::Busy(_) => ErrorKind::Busy,
            CoreError::Timeout(_) => ErrorKind::Timeout,
            CoreError::Bus(_) => ErrorKind::Bus,
            CoreError::Agent { .. } => ErrorKind::Agent,
            CoreError::Cancelled(_) => ErrorKind::Cancelled,
            CoreError::NoConsensus(_) => ErrorKind::NoConsensus,
            CoreError::Pattern(_) => ErrorKind::Pattern,
            CoreError::Decomposition(_) => ErrorKind::Decomposition,
        }
    }

    /// Whether the dispatch layer may retry after this error.
    pub fn retryable(&self) -> bool {
        match self {
            CoreError::Busy(_) | CoreError::Timeout(_) | CoreError::Bus(_) => true,
            CoreError::Agent { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Serialize into the wire-facing payload shape.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
            retryable: self.retryable(),
            cause: None,
        }
    }
}

/// Result alias used throughout the workspace.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Wire-facing failure shape: `{kind, message, retryable, cause?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Taxonomy kind.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Whether a retry may succeed.
    pub retryable: bool,
    /// Upstream cause, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ErrorPayload>>,
}

impl ErrorPayload {
    /// Construct a payload with no cause.
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self { kind, message: message.into(), retryable, cause: None }
    }

    /// Attach an upstream cause (builder style).
    pub fn with_cause(mut self, cause: ErrorPayload) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl From<&CoreError> for ErrorPayload {
    fn from(err: &CoreError) -> Self {
        err.to_payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_layer_kinds_are_retryable() {
        assert!(CoreError::Busy("full".into()).retryable());
        assert!(CoreError::Timeout(Duration::from_secs(1)).retryable());
        assert!(CoreError::Bus("closed".into()).retryable());
        assert!(!CoreError::Validation("bad".into()).retryable());
        assert!(!CoreError::NoConsensus("split".into()).retryable());
    }

    #[test]
    fn agent_error_carries_its_own_retryability() {
        let e = CoreError::Agent { message: "boom".into(), retryable: false };
        assert_eq!(e.kind(), ErrorKind::Agent);
        assert!(!e.retryable());
    }

    #[test]
    fn payload_serializes_kebab_case_kinds() {
        let payload = CoreError::Timeout(Duration::from_millis(50)).to_payload();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["retryable"], true);

        let payload = ErrorPayload::new(ErrorKind::Validation, "empty", false)
            .with_cause(ErrorPayload::new(ErrorKind::Pattern, "cycle", false));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["cause"]["kind"], "pattern-error");
    }
}
