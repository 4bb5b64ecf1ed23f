use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, warn};

use planweave_core_types::WeaveError;

use crate::record::{PerfKey, ToolPerformanceRecord};
use crate::store::PerformanceStore;

/// Tunables for the blended reliability score.
///
/// The exact numbers are deliberately configuration, not constants:
/// recent performance should dominate and overall history should
/// stabilise, but nothing depends on 0.3/0.7 or a window of 10.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    pub overall_weight: f64,
    pub recent_weight: f64,
    /// Size of the bounded recent-outcomes window.
    pub window: usize,
    /// Score assigned to (tool, target) pairs never attempted, so
    /// untried tools are not starved by proven ones.
    pub neutral_score: f64,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            overall_weight: 0.3,
            recent_weight: 0.7,
            window: 10,
            neutral_score: 0.5,
        }
    }
}

/// Online learner ranking fallback candidates by historical success.
///
/// Updates are atomic per (tool, target) key: the dashmap entry guard
/// holds the shard lock for the whole read-modify-write, so concurrent
/// steps recording against the same tool never lose updates.
pub struct ReliabilityLearner {
    records: DashMap<PerfKey, ToolPerformanceRecord>,
    store: Arc<dyn PerformanceStore>,
    config: ReliabilityConfig,
}

impl ReliabilityLearner {
    pub fn new(store: Arc<dyn PerformanceStore>, config: ReliabilityConfig) -> Self {
        Self {
            records: DashMap::new(),
            store,
            config,
        }
    }

    /// Populate the in-memory table from the store. Called once at
    /// startup; unknown pairs keep the neutral default.
    pub async fn preload(&self) -> Result<usize, WeaveError> {
        let records = self.store.load().await?;
        let count = records.len();
        for record in records {
            self.records.insert(record.key(), record);
        }
        debug!(target: "reliability", count, "performance records preloaded");
        Ok(count)
    }

    pub fn config(&self) -> &ReliabilityConfig {
        &self.config
    }

    /// Current score for a pair; neutral default when unseen.
    pub fn score(&self, tool: &str, target_key: &str) -> f64 {
        self.records
            .get(&PerfKey::new(tool, target_key))
            .map(|entry| entry.reliability_score)
            .unwrap_or(self.config.neutral_score)
    }

    /// Record one attempt outcome and persist the updated record.
    pub async fn record(&self, tool: &str, target_key: &str, success: bool, elapsed: Duration) {
        let key = PerfKey::new(tool, target_key);
        let snapshot = {
            let mut entry = self
                .records
                .entry(key.clone())
                .or_insert_with(|| ToolPerformanceRecord::new(&key, self.config.neutral_score));
            entry.observe(success, elapsed, &self.config);
            entry.clone()
        };
        debug!(
            target: "reliability",
            tool,
            target_key,
            success,
            score = snapshot.reliability_score,
            attempts = snapshot.total_attempts,
            "attempt recorded"
        );
        if let Err(err) = self.store.save(&snapshot).await {
            warn!(target: "reliability", tool, target_key, error = %err, "performance store save failed");
        }
    }

    /// Forget one pair, in memory and in the store, so it scores
    /// neutral again even after a restart and `preload`.
    pub async fn reset(&self, tool: &str, target_key: &str) -> Result<(), WeaveError> {
        let key = PerfKey::new(tool, target_key);
        self.records.remove(&key);
        self.store.remove(&key).await
    }

    /// Forget everything, including persisted records.
    pub async fn reset_all(&self) -> Result<(), WeaveError> {
        self.records.clear();
        self.store.clear().await
    }

    /// All known records, for diagnostics.
    pub fn snapshot(&self) -> Vec<ToolPerformanceRecord> {
        self.records
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryPerformanceStore;

    fn learner() -> ReliabilityLearner {
        ReliabilityLearner::new(
            Arc::new(InMemoryPerformanceStore::new()),
            ReliabilityConfig::default(),
        )
    }

    #[tokio::test]
    async fn unseen_pair_scores_neutral() {
        let learner = learner();
        assert_eq!(learner.score("api_search", "search"), 0.5);
    }

    #[tokio::test]
    async fn success_raises_and_failure_lowers() {
        let learner = learner();
        learner
            .record("api_search", "search", true, Duration::from_millis(10))
            .await;
        assert!(learner.score("api_search", "search") > 0.5);

        learner
            .record("browser_search", "search", false, Duration::from_millis(10))
            .await;
        assert!(learner.score("browser_search", "search") < 0.5);
    }

    #[tokio::test]
    async fn records_are_persisted_per_update() {
        let store = Arc::new(InMemoryPerformanceStore::new());
        let learner = ReliabilityLearner::new(store.clone(), ReliabilityConfig::default());
        learner
            .record("api_search", "search", false, Duration::from_millis(5))
            .await;
        learner
            .record("api_search", "search", true, Duration::from_millis(5))
            .await;

        let persisted = store.load().await.unwrap();
        assert_eq!(persisted.len(), 1);
        // Failure-before-success history must survive persistence.
        assert_eq!(persisted[0].total_attempts, 2);
        assert_eq!(persisted[0].successes, 1);
    }

    #[tokio::test]
    async fn preload_restores_learned_scores() {
        let store = Arc::new(InMemoryPerformanceStore::new());
        {
            let learner = ReliabilityLearner::new(store.clone(), ReliabilityConfig::default());
            for _ in 0..5 {
                learner
                    .record("api_search", "search", true, Duration::from_millis(5))
                    .await;
            }
        }

        let fresh = ReliabilityLearner::new(store, ReliabilityConfig::default());
        assert_eq!(fresh.score("api_search", "search"), 0.5);
        let loaded = fresh.preload().await.unwrap();
        assert_eq!(loaded, 1);
        assert!(fresh.score("api_search", "search") > 0.9);
    }

    #[tokio::test]
    async fn reset_pair_does_not_resurrect_after_preload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf.json");

        {
            let store = Arc::new(crate::JsonFilePerformanceStore::new(&path));
            let learner = ReliabilityLearner::new(store, ReliabilityConfig::default());
            learner
                .record("api_search", "search", false, Duration::from_millis(5))
                .await;
            assert!(learner.score("api_search", "search") < 0.5);
            learner.reset("api_search", "search").await.unwrap();
            assert_eq!(learner.score("api_search", "search"), 0.5);
        }

        // A restarted learner must not see the old failure history.
        let store = Arc::new(crate::JsonFilePerformanceStore::new(&path));
        let fresh = ReliabilityLearner::new(store, ReliabilityConfig::default());
        fresh.preload().await.unwrap();
        assert_eq!(fresh.score("api_search", "search"), 0.5);
    }

    #[tokio::test]
    async fn reset_all_clears_store_too() {
        let store = Arc::new(InMemoryPerformanceStore::new());
        let learner = ReliabilityLearner::new(store.clone(), ReliabilityConfig::default());
        learner
            .record("api_search", "search", true, Duration::from_millis(5))
            .await;
        learner.reset_all().await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
        assert_eq!(learner.score("api_search", "search"), 0.5);
    }
}
