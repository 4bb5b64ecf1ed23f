use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ReliabilityConfig;

/// Key identifying a performance record: one concrete tool serving one
/// target capability.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PerfKey {
    pub tool: String,
    pub target_key: String,
}

impl PerfKey {
    pub fn new(tool: impl Into<String>, target_key: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            target_key: target_key.into(),
        }
    }
}

/// Per (tool, target) performance history.
///
/// The recent window is bounded; old outcomes are evicted so recent
/// behaviour dominates the blended score while the overall rate keeps
/// it stable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolPerformanceRecord {
    pub tool: String,
    pub target_key: String,
    pub total_attempts: u64,
    pub successes: u64,
    /// Most recent outcomes, oldest first.
    pub recent: VecDeque<bool>,
    pub reliability_score: f64,
    pub last_elapsed_ms: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl ToolPerformanceRecord {
    pub fn new(key: &PerfKey, neutral_score: f64) -> Self {
        Self {
            tool: key.tool.clone(),
            target_key: key.target_key.clone(),
            total_attempts: 0,
            successes: 0,
            recent: VecDeque::new(),
            reliability_score: neutral_score,
            last_elapsed_ms: 0,
            last_success_at: None,
            last_failure_at: None,
        }
    }

    pub fn key(&self) -> PerfKey {
        PerfKey::new(&self.tool, &self.target_key)
    }

    /// Fold one attempt into the record and recompute the score.
    pub fn observe(&mut self, success: bool, elapsed: Duration, config: &ReliabilityConfig) {
        self.total_attempts += 1;
        if success {
            self.successes += 1;
            self.last_success_at = Some(Utc::now());
        } else {
            self.last_failure_at = Some(Utc::now());
        }
        if self.recent.len() >= config.window.max(1) {
            self.recent.pop_front();
        }
        self.recent.push_back(success);
        self.last_elapsed_ms = elapsed.as_millis() as u64;
        self.reliability_score = self.compute_score(config);
    }

    fn compute_score(&self, config: &ReliabilityConfig) -> f64 {
        if self.total_attempts == 0 {
            return config.neutral_score;
        }
        let overall = self.successes as f64 / self.total_attempts as f64;
        let recent = if self.recent.is_empty() {
            overall
        } else {
            let wins = self.recent.iter().filter(|ok| **ok).count();
            wins as f64 / self.recent.len() as f64
        };
        (config.overall_weight * overall + config.recent_weight * recent).clamp(0.0, 1.0)
    }
}
