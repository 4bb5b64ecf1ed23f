//! Tool reliability learning for the planweave execution kernel.
//!
//! Tracks per (tool, target-capability) success history in a bounded
//! recent window blended with the overall rate, persists it through a
//! pluggable [`PerformanceStore`], and serves the scores the fallback
//! manager orders candidates by.

mod learner;
mod record;
mod store;

pub use learner::{ReliabilityConfig, ReliabilityLearner};
pub use record::{PerfKey, ToolPerformanceRecord};
pub use store::{InMemoryPerformanceStore, JsonFilePerformanceStore, PerformanceStore};
