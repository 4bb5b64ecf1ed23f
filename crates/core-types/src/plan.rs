use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{Step, StepId, StepStatus, TaskId, WeaveError};

/// An ordered collection of steps forming a DAG, plus the replan
/// counter that bounds plan mutation for the run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plan {
    pub task_id: TaskId,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub replan_count: u32,
}

impl Plan {
    pub fn new(task_id: TaskId, steps: Vec<Step>) -> Self {
        Self {
            task_id,
            steps,
            replan_count: 0,
        }
    }

    /// Enforce the plan invariants: unique step ids, every dependency
    /// id present in the plan, and no cycles.
    pub fn validate(&self) -> Result<(), WeaveError> {
        let mut ids = HashSet::new();
        for step in &self.steps {
            if !ids.insert(&step.id) {
                return Err(WeaveError::invalid_plan(format!(
                    "duplicate step id {}",
                    step.id
                )));
            }
        }
        for step in &self.steps {
            for dep in &step.depends_on {
                if !ids.contains(dep) {
                    return Err(WeaveError::invalid_plan(format!(
                        "step {} depends on unknown step {}",
                        step.id, dep
                    )));
                }
            }
        }
        self.check_acyclic()
    }

    fn check_acyclic(&self) -> Result<(), WeaveError> {
        // Kahn's algorithm; anything left over sits on a cycle.
        let mut indegree: HashMap<&StepId, usize> = self
            .steps
            .iter()
            .map(|step| (&step.id, step.depends_on.len()))
            .collect();
        let mut dependents: HashMap<&StepId, Vec<&StepId>> = HashMap::new();
        for step in &self.steps {
            for dep in &step.depends_on {
                dependents.entry(dep).or_default().push(&step.id);
            }
        }

        let mut queue: Vec<&StepId> = indegree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = queue.pop() {
            visited += 1;
            if let Some(children) = dependents.get(id) {
                for child in children {
                    if let Some(count) = indegree.get_mut(child) {
                        *count -= 1;
                        if *count == 0 {
                            queue.push(child);
                        }
                    }
                }
            }
        }

        if visited == self.steps.len() {
            Ok(())
        } else {
            Err(WeaveError::invalid_plan("dependency cycle detected"))
        }
    }

    pub fn get(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|step| &step.id == id)
    }

    pub fn get_mut(&mut self, id: &StepId) -> Option<&mut Step> {
        self.steps.iter_mut().find(|step| &step.id == id)
    }

    pub fn contains(&self, id: &StepId) -> bool {
        self.get(id).is_some()
    }

    pub fn set_status(&mut self, id: &StepId, status: StepStatus) {
        if let Some(step) = self.get_mut(id) {
            step.status = status;
        }
    }

    /// Insert `steps` directly after the step with `after`, preserving
    /// relative order. Appends at the end if the id is unknown.
    pub fn splice_after(&mut self, after: &StepId, steps: Vec<Step>) {
        let position = self
            .steps
            .iter()
            .position(|step| &step.id == after)
            .map(|idx| idx + 1)
            .unwrap_or(self.steps.len());
        for (offset, step) in steps.into_iter().enumerate() {
            self.steps.insert(position + offset, step);
        }
    }

    /// Re-point every step depending on `from` at `to` instead. Used
    /// after a replan so dependents wait on the replacement chain.
    pub fn rewire_dependents(&mut self, from: &StepId, to: &StepId) {
        let to = to.clone();
        for step in &mut self.steps {
            if step.id == to {
                continue;
            }
            for dep in &mut step.depends_on {
                if dep == from {
                    *dep = to.clone();
                }
            }
        }
    }

    /// Step ids no other step depends on; the plan's deliverable steps.
    pub fn leaves(&self) -> Vec<StepId> {
        let depended: HashSet<&StepId> = self
            .steps
            .iter()
            .flat_map(|step| step.depends_on.iter())
            .collect();
        self.steps
            .iter()
            .filter(|step| !depended.contains(&step.id))
            .map(|step| step.id.clone())
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| !step.status.is_terminal())
            .count()
    }

    /// Whether every step reached a terminal status.
    pub fn is_settled(&self) -> bool {
        self.pending() == 0
    }
}
