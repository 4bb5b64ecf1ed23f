use std::{env, fs, path::PathBuf, time::Duration};

use serde::Deserialize;

use planweave_reliability::ReliabilityConfig;

/// Engine tunables, loadable from a yaml file.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fallback attempts per step, capped by the candidate count.
    pub max_attempts: u32,
    /// Per-attempt timeout inside the fallback manager.
    pub attempt_timeout_ms: u64,
    /// Replans allowed per plan before failures propagate.
    pub max_replans: u32,
    /// Ready steps executed in parallel.
    pub max_concurrency: usize,
    /// Task-level wall-clock budget for a whole run.
    pub run_budget_ms: u64,
    /// Grace given to in-flight steps once the run is cancelled.
    pub cancel_grace_ms: u64,
    pub reliability: ReliabilityConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout_ms: 30_000,
            max_replans: 3,
            max_concurrency: 4,
            run_budget_ms: 300_000,
            cancel_grace_ms: 2_000,
            reliability: ReliabilityConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn run_budget(&self) -> Duration {
        Duration::from_millis(self.run_budget_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Load from the path in `PLANWEAVE_ENGINE_CONFIG`, then from the
    /// conventional config locations, falling back to defaults.
    pub fn load_from_env_or_default() -> Self {
        if let Some(path) = env::var_os("PLANWEAVE_ENGINE_CONFIG") {
            if let Some(config) = Self::load_file(PathBuf::from(path)) {
                return config;
            }
        }

        for path in ["config/engine.yaml", "config/defaults/engine.yaml"] {
            let candidate = PathBuf::from(path);
            if !candidate.exists() {
                continue;
            }
            if let Some(config) = Self::load_file(candidate) {
                return config;
            }
        }

        Self::default()
    }

    fn load_file(path: PathBuf) -> Option<Self> {
        let bytes = fs::read(path).ok()?;
        serde_yaml::from_slice(&bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_replans, 3);
        assert!(config.run_budget() > config.attempt_timeout());
    }

    #[test]
    fn partial_yaml_overrides_defaults() {
        let config: EngineConfig =
            serde_yaml::from_str("max_replans: 1\nreliability:\n  window: 5\n").unwrap();
        assert_eq!(config.max_replans, 1);
        assert_eq!(config.reliability.window, 5);
        // Untouched fields keep their defaults.
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.reliability.neutral_score, 0.5);
    }
}
