//! Ordered fallback execution over the candidate tools of a target.
//!
//! Candidates are ranked by learned reliability (ties keep the caller's
//! declaration order), tried until one succeeds or the attempt budget
//! runs out, and every attempt is recorded regardless of the overall
//! outcome.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use planweave_core_types::{ErrorKind, ParamMap, ToolOutcome, WeaveError};
use planweave_reliability::ReliabilityLearner;
use planweave_tool_registry::Tool;

use crate::metrics;

/// Result of running a step through the fallback chain.
#[derive(Clone, Debug)]
pub struct FallbackOutcome {
    pub outcome: ToolOutcome,
    /// Name of the tool that succeeded, when one did.
    pub tool_used: Option<String>,
    /// Tools attempted, in the order they were tried.
    pub tools_tried: Vec<String>,
    pub attempts: u32,
}

impl FallbackOutcome {
    pub fn success(&self) -> bool {
        self.outcome.success
    }

    fn without_candidates(target_key: &str) -> Self {
        Self {
            outcome: ToolOutcome::err(
                WeaveError::tool(
                    ErrorKind::TargetNotFound,
                    format!("no tools registered for target `{target_key}`"),
                ),
                Duration::ZERO,
            ),
            tool_used: None,
            tools_tried: Vec::new(),
            attempts: 0,
        }
    }
}

#[derive(Clone)]
pub struct ToolFallbackManager {
    learner: Arc<ReliabilityLearner>,
    max_attempts: u32,
    attempt_timeout: Duration,
}

impl ToolFallbackManager {
    pub fn new(learner: Arc<ReliabilityLearner>, max_attempts: u32, attempt_timeout: Duration) -> Self {
        Self {
            learner,
            max_attempts: max_attempts.max(1),
            attempt_timeout,
        }
    }

    pub fn learner(&self) -> &Arc<ReliabilityLearner> {
        &self.learner
    }

    /// Candidates ordered descending by reliability score. The sort is
    /// stable, so equal scores preserve declaration order and the
    /// pre-learning ordering stays deterministic.
    pub fn order_candidates(
        &self,
        target_key: &str,
        candidates: Vec<Arc<dyn Tool>>,
    ) -> Vec<Arc<dyn Tool>> {
        let mut scored: Vec<(f64, Arc<dyn Tool>)> = candidates
            .into_iter()
            .map(|tool| (self.learner.score(tool.name(), target_key), tool))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        scored.into_iter().map(|(_, tool)| tool).collect()
    }

    /// Try candidate tools in reliability order until one succeeds.
    pub async fn execute(
        &self,
        target_key: &str,
        candidates: Vec<Arc<dyn Tool>>,
        params: &ParamMap,
        cancel: &CancellationToken,
    ) -> FallbackOutcome {
        if candidates.is_empty() {
            return FallbackOutcome::without_candidates(target_key);
        }

        let ordered = self.order_candidates(target_key, candidates);
        let budget = (self.max_attempts as usize).min(ordered.len());

        let mut tools_tried = Vec::with_capacity(budget);
        let mut attempts = 0u32;
        let mut last_outcome: Option<ToolOutcome> = None;

        for tool in ordered.into_iter().take(budget) {
            if cancel.is_cancelled() {
                last_outcome = Some(ToolOutcome::err(
                    WeaveError::tool(ErrorKind::Cancelled, "cancelled before attempt"),
                    Duration::ZERO,
                ));
                break;
            }
            if attempts > 0 {
                metrics::record_fallback_switch();
            }

            let outcome = match timeout(self.attempt_timeout, tool.execute(params, cancel)).await {
                Ok(outcome) => outcome,
                Err(_) => ToolOutcome::err(
                    WeaveError::tool(
                        ErrorKind::Timeout,
                        format!(
                            "tool {} timed out after {:?}",
                            tool.name(),
                            self.attempt_timeout
                        ),
                    ),
                    self.attempt_timeout,
                ),
            };

            attempts += 1;
            metrics::record_attempt();
            tools_tried.push(tool.name().to_string());
            self.learner
                .record(tool.name(), target_key, outcome.success, outcome.elapsed)
                .await;

            if outcome.success {
                info!(
                    target: "fallback",
                    target_key,
                    tool = tool.name(),
                    attempts,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "tool attempt succeeded"
                );
                return FallbackOutcome {
                    outcome,
                    tool_used: Some(tool.name().to_string()),
                    tools_tried,
                    attempts,
                };
            }

            warn!(
                target: "fallback",
                target_key,
                tool = tool.name(),
                attempts,
                error = %outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| WeaveError::new("unspecified failure")),
                "tool attempt failed"
            );
            last_outcome = Some(outcome);
        }

        FallbackOutcome {
            outcome: last_outcome.unwrap_or_else(|| {
                ToolOutcome::err(
                    WeaveError::tool(ErrorKind::Internal, "no attempt was made"),
                    Duration::ZERO,
                )
            }),
            tool_used: None,
            tools_tried,
            attempts,
        }
    }
}
