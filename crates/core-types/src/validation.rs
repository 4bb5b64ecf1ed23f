use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Step, TaskGoal};

/// What the validator thinks the engine should do about an invalid
/// step result.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    #[default]
    None,
    /// Re-run the same target; the failure looked transient.
    RetrySame,
    /// The result was real but short of the requested quantity.
    FetchMore,
    /// The target cannot produce the required fields; try another.
    DifferentTarget,
}

/// Outcome of evaluating a step result against the task goal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub needs_replan: bool,
    pub reason: String,
    pub suggested_action: SuggestedAction,
    /// Fraction of the goal covered so far, in [0, 1].
    pub coverage: f32,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            needs_replan: false,
            reason: String::new(),
            suggested_action: SuggestedAction::None,
            coverage: 1.0,
        }
    }

    pub fn invalid(
        needs_replan: bool,
        suggested_action: SuggestedAction,
        coverage: f32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            valid: false,
            needs_replan,
            reason: reason.into(),
            suggested_action,
            coverage: coverage.clamp(0.0, 1.0),
        }
    }
}

/// The slice of run state handed to the replan collaborator: the failed
/// step, why it failed, and the task goal. Deliberately not the full
/// execution history.
#[derive(Clone, Debug)]
pub struct ReplanRequest {
    pub failed_step: Step,
    pub validation: ValidationResult,
    pub goal: TaskGoal,
    /// Output the failed step produced, when it produced any.
    pub failed_output: Option<Value>,
}
