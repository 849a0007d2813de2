//! The failure-kind taxonomy shared across the orchestrator.
//!
//! Every fallible path in the core eventually collapses into one of these
//! kinds before it reaches a client response or a job's error field. Kinds
//! that are retriable are retried with bounded backoff by the component
//! that observed them (the Execution Driver for submit/harvest transport
//! errors, the Worker Pool for no-node backoff); a kind never silently
//! changes its retriability once assigned.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A taxonomy-level failure kind, per the error handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Validation,
    Auth,
    NotFound,
    NoNode,
    Submit,
    Execution,
    Timeout,
    NoOutput,
    Transport,
    Internal,
}

impl FailureKind {
    /// Whether the Execution Driver / Worker Pool should retry on this kind.
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            FailureKind::NoNode | FailureKind::Submit | FailureKind::Timeout | FailureKind::Transport
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::Auth => "auth",
            FailureKind::NotFound => "not-found",
            FailureKind::NoNode => "no-node",
            FailureKind::Submit => "submit",
            FailureKind::Execution => "execution",
            FailureKind::Timeout => "timeout",
            FailureKind::NoOutput => "no-output",
            FailureKind::Transport => "transport",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A structured, user-displayable failure record: `{kind, message, details?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl JobError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for JobError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_kinds_match_the_taxonomy_table() {
        assert!(FailureKind::NoNode.is_retriable());
        assert!(FailureKind::Submit.is_retriable());
        assert!(FailureKind::Timeout.is_retriable());
        assert!(FailureKind::Transport.is_retriable());
        assert!(!FailureKind::Validation.is_retriable());
        assert!(!FailureKind::Auth.is_retriable());
        assert!(!FailureKind::NotFound.is_retriable());
        assert!(!FailureKind::Execution.is_retriable());
        assert!(!FailureKind::NoOutput.is_retriable());
        assert!(!FailureKind::Internal.is_retriable());
    }

    #[test]
    fn job_error_serializes_with_kebab_case_kind() {
        let err = JobError::new(FailureKind::NoNode, "fleet empty");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "no-node");
        assert_eq!(json["message"], "fleet empty");
        assert!(json.get("details").is_none());
    }
}
