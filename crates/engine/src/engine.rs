//! The execution state machine: walks a plan's DAG, runs ready steps
//! in parallel through the fallback chain, validates outcomes, and
//! splices replacement steps on recoverable failure.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use planweave_core_types::{
    ParamMap, Plan, ReplanRequest, RunId, Step, StepId, StepStatus, Task, TaskId, WeaveError,
};
use planweave_reliability::ReliabilityLearner;
use planweave_tool_registry::ToolRegistry;

use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::dataflow::DataFlowResolver;
use crate::fallback::{FallbackOutcome, ToolFallbackManager};
use crate::metrics;
use crate::proposer::ReplanProposer;
use crate::replanner::Replanner;
use crate::validator::{item_count, StepValidator};

/// Terminal (and in-flight) state of a whole run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    BudgetExceeded,
    Cancelled,
}

/// Per-step outcome surfaced in the run result. Every step the plan
/// ever contained is reported; nothing is silently dropped.
#[derive(Clone, Debug, Serialize)]
pub struct StepReport {
    pub step_id: StepId,
    pub target: String,
    pub status: StepStatus,
    pub tool_used: Option<String>,
    pub attempts: u32,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub task_id: TaskId,
    pub status: RunStatus,
    pub steps: Vec<StepReport>,
    /// Fraction of the task goal covered, in [0, 1].
    pub completeness: f32,
    pub replans: u32,
    pub elapsed_ms: u64,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Completed)
    }

    pub fn succeeded_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| step.status == StepStatus::Succeeded)
            .count()
    }
}

#[derive(Clone, Debug, Default)]
struct ReportExtra {
    tool_used: Option<String>,
    attempts: u32,
    reason: Option<String>,
}

enum WorkerOutput {
    Finished {
        step_id: StepId,
        resolved: ParamMap,
        fallback: FallbackOutcome,
    },
    ResolutionFailed {
        step_id: StepId,
        error: WeaveError,
    },
}

impl WorkerOutput {
    fn step_id(&self) -> &StepId {
        match self {
            WorkerOutput::Finished { step_id, .. } => step_id,
            WorkerOutput::ResolutionFailed { step_id, .. } => step_id,
        }
    }
}

/// Orchestrates resolver, fallback manager, validator and replanner
/// into the run loop. All per-run state lives in an
/// [`ExecutionContext`] created at run start; the engine itself is
/// stateless across runs apart from the shared reliability learner.
pub struct ExecutionEngine {
    registry: Arc<ToolRegistry>,
    fallback: ToolFallbackManager,
    validator: StepValidator,
    replanner: Replanner,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<ToolRegistry>,
        learner: Arc<ReliabilityLearner>,
        proposer: Arc<dyn ReplanProposer>,
        config: EngineConfig,
    ) -> Self {
        let fallback =
            ToolFallbackManager::new(learner, config.max_attempts, config.attempt_timeout());
        let replanner = Replanner::new(proposer, config.max_replans);
        Self {
            registry,
            fallback,
            validator: StepValidator::new(),
            replanner,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn learner(&self) -> &Arc<ReliabilityLearner> {
        self.fallback.learner()
    }

    pub async fn run(&self, task: &Task, plan: Plan) -> Result<RunResult, WeaveError> {
        self.run_with_cancel(task, plan, CancellationToken::new())
            .await
    }

    pub async fn run_with_cancel(
        &self,
        task: &Task,
        plan: Plan,
        cancel: CancellationToken,
    ) -> Result<RunResult, WeaveError> {
        self.run_inner(RunId::new(), task, plan, cancel).await
    }

    pub(crate) async fn run_inner(
        &self,
        run_id: RunId,
        task: &Task,
        mut plan: Plan,
        cancel: CancellationToken,
    ) -> Result<RunResult, WeaveError> {
        plan.validate()?;

        let ctx = Arc::new(ExecutionContext::new());
        let started = Instant::now();
        let deadline = started + self.config.run_budget();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut extra: HashMap<StepId, ReportExtra> = HashMap::new();
        let mut budget_exceeded = false;

        info!(
            target: "engine",
            run = %run_id,
            task = %task.id,
            steps = plan.steps.len(),
            "run started"
        );

        loop {
            propagate_skips(&mut plan, &mut extra);
            if cancel.is_cancelled() {
                break;
            }

            let ready = ready_steps(&plan, &ctx);
            if ready.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                budget_exceeded = true;
                break;
            }

            let mut join_set: JoinSet<WorkerOutput> = JoinSet::new();
            for step in ready {
                plan.set_status(&step.id, StepStatus::Running);
                metrics::record_step_started();

                let candidates = self.registry.candidates(&step.target);
                let fallback = self.fallback.clone();
                let worker_ctx = Arc::clone(&ctx);
                let worker_cancel = cancel.clone();
                let worker_semaphore = Arc::clone(&semaphore);
                join_set.spawn(async move {
                    let _permit = worker_semaphore.acquire_owned().await.ok();
                    worker_ctx.record_attempt(&step.id);
                    let resolved = match DataFlowResolver::resolve(&step, &worker_ctx) {
                        Ok(params) => params,
                        Err(error) => {
                            return WorkerOutput::ResolutionFailed {
                                step_id: step.id,
                                error,
                            }
                        }
                    };
                    let fallback_outcome = fallback
                        .execute(&step.target, candidates, &resolved, &worker_cancel)
                        .await;
                    WorkerOutput::Finished {
                        step_id: step.id,
                        resolved,
                        fallback: fallback_outcome,
                    }
                });
            }

            let mut batch = Vec::new();
            loop {
                match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                    Ok(Some(Ok(output))) => batch.push(output),
                    Ok(Some(Err(join_error))) => {
                        warn!(target: "engine", error = %join_error, "step worker aborted")
                    }
                    Ok(None) => break,
                    Err(_) => {
                        // Budget expired with steps in flight: stop
                        // admitting work, cancel, and give the stragglers
                        // a grace period to return partial output.
                        budget_exceeded = true;
                        cancel.cancel();
                        let grace_deadline = Instant::now() + self.config.cancel_grace();
                        while let Ok(Some(result)) =
                            tokio::time::timeout_at(grace_deadline, join_set.join_next()).await
                        {
                            if let Ok(output) = result {
                                batch.push(output);
                            }
                        }
                        join_set.abort_all();
                        break;
                    }
                }
            }

            // Apply outcomes serially in plan order so replan splices
            // land deterministically.
            batch.sort_by_key(|output| {
                plan.steps
                    .iter()
                    .position(|step| &step.id == output.step_id())
                    .unwrap_or(usize::MAX)
            });
            for output in batch {
                self.apply_output(output, task, &mut plan, &ctx, &mut extra)
                    .await;
            }

            if budget_exceeded || cancel.is_cancelled() {
                break;
            }
        }

        settle_leftovers(&mut plan, &mut extra);

        let completeness = compute_completeness(task, &plan, &ctx);
        let status = if budget_exceeded {
            RunStatus::BudgetExceeded
        } else if cancel.is_cancelled() {
            RunStatus::Cancelled
        } else if leaf_succeeded(&plan) {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };

        let steps = plan
            .steps
            .iter()
            .map(|step| {
                let e = extra.get(&step.id);
                StepReport {
                    step_id: step.id.clone(),
                    target: step.target.clone(),
                    status: step.status,
                    tool_used: e.and_then(|e| e.tool_used.clone()),
                    attempts: e.map(|e| e.attempts).unwrap_or(0),
                    reason: e.and_then(|e| e.reason.clone()),
                }
            })
            .collect();

        info!(
            target: "engine",
            run = %run_id,
            status = ?status,
            completeness,
            replans = plan.replan_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );

        Ok(RunResult {
            run_id,
            task_id: task.id.clone(),
            status,
            steps,
            completeness,
            replans: plan.replan_count,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn apply_output(
        &self,
        output: WorkerOutput,
        task: &Task,
        plan: &mut Plan,
        ctx: &Arc<ExecutionContext>,
        extra: &mut HashMap<StepId, ReportExtra>,
    ) {
        match output {
            WorkerOutput::ResolutionFailed { step_id, error } => {
                warn!(target: "engine", step = %step_id, error = %error, "parameter resolution failed");
                plan.set_status(&step_id, StepStatus::Skipped);
                metrics::record_step_skipped();
                extra.entry(step_id).or_default().reason = Some(error.to_string());
            }
            WorkerOutput::Finished {
                step_id,
                resolved,
                fallback,
            } => {
                if let Some(step) = plan.get_mut(&step_id) {
                    step.resolved_params = Some(resolved);
                }
                let step = match plan.get(&step_id) {
                    Some(step) => step.clone(),
                    None => return,
                };

                let prior = accumulated_for_target(plan, ctx, &step.target, &step.id);
                let validation = self.validator.validate(&step, &fallback, &task.goal, prior);

                {
                    let e = extra.entry(step_id.clone()).or_default();
                    e.tool_used = fallback.tool_used.clone();
                    e.attempts = fallback.attempts;
                }

                if validation.valid {
                    let value = fallback.outcome.output.clone().unwrap_or(Value::Null);
                    if let Err(error) = ctx.set(&step_id, value) {
                        warn!(target: "engine", step = %step_id, error = %error, "context write rejected");
                    }
                    plan.set_status(&step_id, StepStatus::Succeeded);
                    metrics::record_step_succeeded();
                    info!(
                        target: "engine",
                        step = %step_id,
                        tool = fallback.tool_used.as_deref().unwrap_or("-"),
                        attempts = fallback.attempts,
                        "step succeeded"
                    );
                    return;
                }

                extra.entry(step_id.clone()).or_default().reason =
                    Some(validation.reason.clone());

                if validation.needs_replan {
                    // Keep whatever real data the step produced: it
                    // counts towards the goal and stays referencable.
                    if let Some(value) = fallback.outcome.output.clone() {
                        if let Err(error) = ctx.set(&step_id, value) {
                            warn!(target: "engine", step = %step_id, error = %error, "context write rejected");
                        }
                    }
                    let request = ReplanRequest {
                        failed_step: step.clone(),
                        validation: validation.clone(),
                        goal: task.goal.clone(),
                        failed_output: fallback.outcome.output.clone(),
                    };
                    match self.replanner.replan(&request, plan).await {
                        Ok(Some(new_ids)) => {
                            info!(
                                target: "engine",
                                step = %step_id,
                                spliced = new_ids.len(),
                                "follow-up steps injected"
                            );
                        }
                        Ok(None) => {
                            warn!(
                                target: "engine",
                                step = %step_id,
                                "no replan available; surfacing partial result"
                            );
                        }
                        Err(error) => {
                            warn!(target: "engine", step = %step_id, error = %error, "replan rejected");
                        }
                    }
                }

                plan.set_status(&step_id, StepStatus::Failed);
                metrics::record_step_failed();
            }
        }
    }
}

/// Pending steps whose dependencies all succeeded and whose referenced
/// outputs are present in the context.
fn ready_steps(plan: &Plan, ctx: &ExecutionContext) -> Vec<Step> {
    plan.steps
        .iter()
        .filter(|step| step.status == StepStatus::Pending)
        .filter(|step| {
            step.depends_on.iter().all(|dep| {
                plan.get(dep)
                    .map(|d| d.status == StepStatus::Succeeded)
                    .unwrap_or(false)
            })
        })
        .filter(|step| {
            DataFlowResolver::referenced_steps(&step.params)
                .iter()
                .all(|id| ctx.contains(id))
        })
        .cloned()
        .collect()
}

/// Transitively skip pending steps whose dependencies ended dead.
fn propagate_skips(plan: &mut Plan, extra: &mut HashMap<StepId, ReportExtra>) {
    loop {
        let dead: Vec<StepId> = plan
            .steps
            .iter()
            .filter(|step| matches!(step.status, StepStatus::Failed | StepStatus::Skipped))
            .map(|step| step.id.clone())
            .collect();

        let mut changed = false;
        for step in &mut plan.steps {
            if step.status != StepStatus::Pending {
                continue;
            }
            if let Some(dep) = step.depends_on.iter().find(|dep| dead.contains(dep)) {
                let reason = format!("dependency {dep} did not succeed");
                step.status = StepStatus::Skipped;
                metrics::record_step_skipped();
                extra.entry(step.id.clone()).or_default().reason = Some(reason);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

/// Force a terminal status on anything the loop left behind: in-flight
/// steps after cancellation, and pending steps that became unreachable.
fn settle_leftovers(plan: &mut Plan, extra: &mut HashMap<StepId, ReportExtra>) {
    for step in &mut plan.steps {
        match step.status {
            StepStatus::Running | StepStatus::Ready => {
                step.status = StepStatus::Failed;
                metrics::record_step_failed();
                extra.entry(step.id.clone()).or_default().reason = Some("cancelled".to_string());
            }
            StepStatus::Pending => {
                step.status = StepStatus::Skipped;
                metrics::record_step_skipped();
            }
            _ => {}
        }
    }
}

/// Items already accumulated for a target by other steps, so follow-up
/// validation is cumulative.
fn accumulated_for_target(
    plan: &Plan,
    ctx: &ExecutionContext,
    target: &str,
    exclude: &StepId,
) -> usize {
    plan.steps
        .iter()
        .filter(|step| step.target == target && &step.id != exclude)
        .filter_map(|step| ctx.get(&step.id))
        .map(|output| item_count(&output))
        .sum()
}

fn leaf_succeeded(plan: &Plan) -> bool {
    plan.leaves().iter().any(|id| {
        plan.get(id)
            .map(|step| step.status == StepStatus::Succeeded)
            .unwrap_or(false)
    })
}

fn compute_completeness(task: &Task, plan: &Plan, ctx: &ExecutionContext) -> f32 {
    if let Some(required) = task.goal.requested_count {
        let mut totals: HashMap<&str, usize> = HashMap::new();
        let mut best = 0usize;
        for step in &plan.steps {
            if let Some(output) = ctx.get(&step.id) {
                let entry = totals.entry(step.target.as_str()).or_insert(0);
                *entry += item_count(&output);
                best = best.max(*entry);
            }
        }
        (best as f32 / required.max(1) as f32).min(1.0)
    } else {
        let total = plan.steps.len().max(1);
        let succeeded = plan
            .steps
            .iter()
            .filter(|step| step.status == StepStatus::Succeeded)
            .count();
        succeeded as f32 / total as f32
    }
}
