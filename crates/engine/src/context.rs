use std::collections::HashMap;

use dashmap::DashMap;
use serde_json::Value;
use tracing::warn;

use planweave_core_types::{StepId, WeaveError};

/// Per-run accumulated state: step outputs and attempt counts.
///
/// Constructed at run start and owned by that run; nothing survives
/// teardown except the externally persisted performance store. Writes
/// are single-writer-per-key: only the step owning an id ever sets it,
/// and a second write for the same id is rejected. Readers never see a
/// partially written output (dashmap insert is atomic per entry).
#[derive(Debug, Default)]
pub struct ExecutionContext {
    outputs: DashMap<StepId, Value>,
    attempts: DashMap<StepId, u32>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step's output. Exactly-once per id: re-running a step
    /// after replan happens under a new id, never by overwriting.
    pub fn set(&self, step_id: &StepId, output: Value) -> Result<(), WeaveError> {
        if self.outputs.contains_key(step_id) {
            warn!(target: "engine", step = %step_id, "duplicate output write rejected");
            return Err(WeaveError::new(format!(
                "output for step {step_id} already recorded"
            )));
        }
        self.outputs.insert(step_id.clone(), output);
        Ok(())
    }

    pub fn get(&self, step_id: &StepId) -> Option<Value> {
        self.outputs.get(step_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, step_id: &StepId) -> bool {
        self.outputs.contains_key(step_id)
    }

    /// Bump and return the attempt count for a step.
    pub fn record_attempt(&self, step_id: &StepId) -> u32 {
        let mut entry = self.attempts.entry(step_id.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn attempts(&self, step_id: &StepId) -> u32 {
        self.attempts.get(step_id).map(|entry| *entry).unwrap_or(0)
    }

    /// Immutable view of all accumulated outputs.
    pub fn snapshot(&self) -> HashMap<StepId, Value> {
        self.outputs
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get() {
        let ctx = ExecutionContext::new();
        let id = StepId::from_name("a");
        ctx.set(&id, json!({"items": [1, 2]})).unwrap();
        assert_eq!(ctx.get(&id), Some(json!({"items": [1, 2]})));
        assert!(ctx.contains(&id));
        assert_eq!(ctx.get(&StepId::from_name("b")), None);
    }

    #[test]
    fn second_write_for_same_id_is_rejected() {
        let ctx = ExecutionContext::new();
        let id = StepId::from_name("a");
        ctx.set(&id, json!(1)).unwrap();
        assert!(ctx.set(&id, json!(2)).is_err());
        // The original value is untouched.
        assert_eq!(ctx.get(&id), Some(json!(1)));
    }

    #[test]
    fn attempts_accumulate_per_step() {
        let ctx = ExecutionContext::new();
        let id = StepId::from_name("a");
        assert_eq!(ctx.attempts(&id), 0);
        assert_eq!(ctx.record_attempt(&id), 1);
        assert_eq!(ctx.record_attempt(&id), 2);
        assert_eq!(ctx.attempts(&id), 2);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let ctx = ExecutionContext::new();
        ctx.set(&StepId::from_name("a"), json!(1)).unwrap();
        let snap = ctx.snapshot();
        ctx.set(&StepId::from_name("b"), json!(2)).unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(ctx.len(), 2);
    }
}
