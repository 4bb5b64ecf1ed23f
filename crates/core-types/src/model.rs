use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{StepId, TaskId, WeaveError};

/// Parameter and output maps are plain JSON objects.
pub type ParamMap = serde_json::Map<String, Value>;

/// Structured goal fields a run is measured against.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TaskGoal {
    /// Minimum number of items the task should produce, if quantified.
    #[serde(default)]
    pub requested_count: Option<usize>,
    /// Fields that must be present somewhere in the produced items.
    #[serde(default)]
    pub required_fields: Vec<String>,
}

impl TaskGoal {
    pub fn with_count(count: usize) -> Self {
        Self {
            requested_count: Some(count),
            required_fields: Vec::new(),
        }
    }
}

/// A high-level task. Immutable once created; decomposition into a
/// [`crate::Plan`] is the planner collaborator's job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    #[serde(default)]
    pub goal: TaskGoal,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            description: description.into(),
            goal: TaskGoal::default(),
        }
    }

    pub fn with_goal(description: impl Into<String>, goal: TaskGoal) -> Self {
        Self {
            id: TaskId::new(),
            description: description.into(),
            goal,
        }
    }
}

/// Lifecycle of a step inside a plan.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

/// Atomic unit of work: a target capability, a parameter template and
/// the steps it depends on.
///
/// `params` is the immutable template as produced by the planner;
/// resolved parameters are stored separately so re-resolution after a
/// retry is idempotent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    /// Capability key resolved to concrete tools at execution time.
    pub target: String,
    pub params: ParamMap,
    #[serde(default)]
    pub depends_on: Vec<StepId>,
    #[serde(default = "Step::default_status")]
    pub status: StepStatus,
    #[serde(skip)]
    pub resolved_params: Option<ParamMap>,
}

impl Step {
    fn default_status() -> StepStatus {
        StepStatus::Pending
    }

    pub fn new(target: impl Into<String>, params: ParamMap) -> Self {
        Self {
            id: StepId::new(),
            target: target.into(),
            params,
            depends_on: Vec::new(),
            status: StepStatus::Pending,
            resolved_params: None,
        }
    }

    /// Build a step with an explicit, human-readable id. Useful for
    /// planners that want referencable step names.
    pub fn named(id: impl Into<String>, target: impl Into<String>, params: ParamMap) -> Self {
        Self {
            id: StepId::from_name(id),
            target: target.into(),
            params,
            depends_on: Vec::new(),
            status: StepStatus::Pending,
            resolved_params: None,
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<StepId>) -> Self {
        self.depends_on = deps;
        self
    }
}

/// Shape of a step as proposed by the replan collaborator, before the
/// replanner assigns ids and wires dependencies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepTemplate {
    pub target: String,
    pub params: ParamMap,
    /// Explicit dependencies; when absent the replanner reuses the
    /// failed step's predecessors.
    #[serde(default)]
    pub depends_on: Option<Vec<StepId>>,
}

impl StepTemplate {
    pub fn new(target: impl Into<String>, params: ParamMap) -> Self {
        Self {
            target: target.into(),
            params,
            depends_on: None,
        }
    }
}

/// Result shape every concrete tool reports back.
#[derive(Clone, Debug)]
pub struct ToolOutcome {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<WeaveError>,
    pub elapsed: Duration,
}

impl ToolOutcome {
    pub fn ok(output: Value, elapsed: Duration) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            elapsed,
        }
    }

    pub fn err(error: WeaveError, elapsed: Duration) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error),
            elapsed,
        }
    }
}
