//! Tool abstraction and capability registry.
//!
//! Concrete tools implement [`Tool`] and register under a target key
//! (a capability such as `"search"` or `"extract"`). Several tools may
//! share a key; together they form the fallback candidate set the
//! engine orders by learned reliability at execution time.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use planweave_core_types::{ParamMap, ToolOutcome};

/// A single concrete capability implementation.
///
/// `execute` must observe the cancellation token at its own suspension
/// points; the engine additionally bounds each attempt with a timeout.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable name used for reliability bookkeeping.
    fn name(&self) -> &str;

    async fn execute(&self, params: &ParamMap, cancel: &CancellationToken) -> ToolOutcome;
}

/// Registry mapping target keys to their candidate tools.
///
/// Registration order is preserved per key; it is the deterministic
/// default ordering before any reliability learning has occurred.
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Vec<Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, target_key: impl Into<String>, tool: Arc<dyn Tool>) {
        self.tools.entry(target_key.into()).or_default().push(tool);
    }

    /// Candidate tools for a capability, in registration order. Empty
    /// when nothing is registered for the key.
    pub fn candidates(&self, target_key: &str) -> Vec<Arc<dyn Tool>> {
        self.tools
            .get(target_key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn has_target(&self, target_key: &str) -> bool {
        self.tools
            .get(target_key)
            .map(|entry| !entry.value().is_empty())
            .unwrap_or(false)
    }

    pub fn targets(&self) -> Vec<String> {
        self.tools.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct StaticTool {
        name: String,
    }

    #[async_trait]
    impl Tool for StaticTool {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, _params: &ParamMap, _cancel: &CancellationToken) -> ToolOutcome {
            ToolOutcome::ok(serde_json::json!({"tool": self.name}), Duration::ZERO)
        }
    }

    fn tool(name: &str) -> Arc<dyn Tool> {
        Arc::new(StaticTool {
            name: name.to_string(),
        })
    }

    #[tokio::test]
    async fn candidates_keep_registration_order() {
        let registry = ToolRegistry::new();
        registry.register("search", tool("api_search"));
        registry.register("search", tool("browser_search"));
        registry.register("extract", tool("dom_extract"));

        let candidates = registry.candidates("search");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].name(), "api_search");
        assert_eq!(candidates[1].name(), "browser_search");
        assert_eq!(registry.candidates("extract").len(), 1);
    }

    #[tokio::test]
    async fn unknown_target_yields_no_candidates() {
        let registry = ToolRegistry::new();
        assert!(registry.candidates("missing").is_empty());
        assert!(!registry.has_target("missing"));
    }

    #[tokio::test]
    async fn registered_tool_executes() {
        let registry = ToolRegistry::new();
        registry.register("search", tool("api_search"));
        let cancel = CancellationToken::new();
        let candidates = registry.candidates("search");
        let outcome = candidates[0].execute(&ParamMap::new(), &cancel).await;
        assert!(outcome.success);
    }
}
