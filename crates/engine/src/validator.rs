//! Step-result validation against the task goal.
//!
//! Rules are applied in order and the first match wins: tool-layer
//! failure, quantity shortfall, missing required fields, then valid.

use serde_json::Value;
use tracing::debug;

use planweave_core_types::{
    ErrorKind, Step, SuggestedAction, TaskGoal, ValidationResult,
};

use crate::fallback::FallbackOutcome;

/// How many items an output contributes towards a quantified goal.
/// Arrays count their length, objects with an `items` array count that
/// array, any other non-null value counts as one.
pub fn item_count(output: &Value) -> usize {
    match output {
        Value::Array(items) => items.len(),
        Value::Object(map) => match map.get("items") {
            Some(Value::Array(items)) => items.len(),
            _ => 1,
        },
        Value::Null => 0,
        _ => 1,
    }
}

fn items_of(output: &Value) -> Vec<&Value> {
    match output {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get("items") {
            Some(Value::Array(items)) => items.iter().collect(),
            _ => vec![output],
        },
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn field_present(items: &[&Value], field: &str) -> bool {
    items.iter().any(|item| match item {
        Value::Object(map) => map.contains_key(field),
        _ => false,
    })
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StepValidator;

impl StepValidator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a step result. `prior_count` is the number of items
    /// already accumulated for this step's target, so follow-up steps
    /// injected to cover a shortfall are judged cumulatively.
    pub fn validate(
        &self,
        step: &Step,
        result: &FallbackOutcome,
        goal: &TaskGoal,
        prior_count: usize,
    ) -> ValidationResult {
        if !result.outcome.success {
            let kind = result
                .outcome
                .error
                .as_ref()
                .and_then(|err| err.kind())
                .unwrap_or(ErrorKind::Internal);
            let recoverable = kind.is_recoverable();
            let reason = result
                .outcome
                .error
                .as_ref()
                .map(|err| err.to_string())
                .unwrap_or_else(|| "tool reported failure".to_string());
            let action = if recoverable {
                SuggestedAction::RetrySame
            } else {
                SuggestedAction::None
            };
            let coverage = goal
                .requested_count
                .map(|required| prior_count as f32 / required.max(1) as f32)
                .unwrap_or(0.0);
            debug!(target: "engine", step = %step.id, kind = ?kind, "step failed validation: tool failure");
            return ValidationResult::invalid(recoverable, action, coverage, reason);
        }

        let output = result.outcome.output.clone().unwrap_or(Value::Null);

        if let Some(required) = goal.requested_count {
            let count = prior_count + item_count(&output);
            if count < required {
                return ValidationResult::invalid(
                    true,
                    SuggestedAction::FetchMore,
                    count as f32 / required as f32,
                    format!("{count} of {required} requested items"),
                );
            }
        }

        if !goal.required_fields.is_empty() {
            let items = items_of(&output);
            let present = goal
                .required_fields
                .iter()
                .filter(|field| field_present(&items, field))
                .count();
            if present < goal.required_fields.len() {
                let missing: Vec<&str> = goal
                    .required_fields
                    .iter()
                    .filter(|field| !field_present(&items, field))
                    .map(String::as_str)
                    .collect();
                return ValidationResult::invalid(
                    true,
                    SuggestedAction::DifferentTarget,
                    present as f32 / goal.required_fields.len() as f32,
                    format!("required field(s) missing from all items: {}", missing.join(", ")),
                );
            }
        }

        ValidationResult::valid()
    }
}
