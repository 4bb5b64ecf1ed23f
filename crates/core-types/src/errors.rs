use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::StepId;

/// Classification of tool-layer failures, used to decide whether a
/// failed step is eligible for fallback retry and replanning.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The requested capability or element could not be located.
    TargetNotFound,
    /// The attempt exceeded its timeout.
    Timeout,
    /// Transient network failure.
    Network,
    /// Authentication or permission failure.
    Permission,
    /// Protocol-level failure that will not go away on retry.
    Protocol,
    /// The task itself is malformed.
    InvalidTask,
    /// The attempt was cancelled by the caller or the run budget.
    Cancelled,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Whether a failure of this kind may succeed on a different tool
    /// or after replanning.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::TargetNotFound | ErrorKind::Timeout | ErrorKind::Network
        )
    }
}

/// Errors emitted across the planweave crates.
#[derive(Debug, Error, Clone)]
pub enum WeaveError {
    /// A tool attempt failed with a classified kind.
    #[error("tool failure ({kind:?}): {message}")]
    Tool { kind: ErrorKind, message: String },

    /// A parameter referenced an output path that does not exist in the
    /// producing step's output. Never substituted with null.
    #[error("step {step} produced no output at `{path}`")]
    MissingReference { step: StepId, path: String },

    /// A plan violated the DAG invariant or referenced unknown steps.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// The performance store failed to load or persist a record.
    #[error("store error: {0}")]
    Store(String),

    /// Generic message error.
    #[error("{0}")]
    Message(String),
}

impl WeaveError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub fn tool(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Tool {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_plan(message: impl Into<String>) -> Self {
        Self::InvalidPlan(message.into())
    }

    pub fn missing_reference(step: StepId, path: impl Into<String>) -> Self {
        Self::MissingReference {
            step,
            path: path.into(),
        }
    }

    /// The failure classification, when one applies.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Tool { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind().is_some_and(ErrorKind::is_recoverable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_kinds() {
        assert!(ErrorKind::TargetNotFound.is_recoverable());
        assert!(ErrorKind::Timeout.is_recoverable());
        assert!(ErrorKind::Network.is_recoverable());
        assert!(!ErrorKind::Permission.is_recoverable());
        assert!(!ErrorKind::Protocol.is_recoverable());
        assert!(!ErrorKind::Cancelled.is_recoverable());
    }

    #[test]
    fn tool_error_carries_kind() {
        let err = WeaveError::tool(ErrorKind::Timeout, "search timed out");
        assert_eq!(err.kind(), Some(ErrorKind::Timeout));
        assert!(err.is_recoverable());

        let err = WeaveError::new("oops");
        assert_eq!(err.kind(), None);
        assert!(!err.is_recoverable());
    }
}
