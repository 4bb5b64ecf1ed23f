//! Adaptive plan execution.
//!
//! The engine walks a task's step DAG, resolving cross-step data
//! references, executing each step through reliability-ordered tool
//! fallback, validating results against the task goal and splicing
//! bounded replacement steps into the plan when a result falls short.
//!
//! Construction follows the collaborator pattern: a [`ToolRegistry`]
//! of capabilities, a shared [`ReliabilityLearner`], and a
//! [`ReplanProposer`] are wired into an [`ExecutionEngine`], which is
//! then driven either directly with [`ExecutionEngine::run`] or
//! detached via [`ExecutionEngine::submit`].
//!
//! [`ToolRegistry`]: planweave_tool_registry::ToolRegistry
//! [`ReliabilityLearner`]: planweave_reliability::ReliabilityLearner

pub mod api;
pub mod config;
pub mod context;
pub mod dataflow;
pub mod engine;
pub mod fallback;
pub mod metrics;
pub mod planner;
pub mod proposer;
pub mod replanner;
pub mod validator;

pub use api::RunHandle;
pub use config::EngineConfig;
pub use context::ExecutionContext;
pub use dataflow::DataFlowResolver;
pub use engine::{ExecutionEngine, RunResult, RunStatus, StepReport};
pub use fallback::{FallbackOutcome, ToolFallbackManager};
pub use planner::{Planner, StaticPlanner};
pub use proposer::{HeuristicProposer, NoopProposer, ReplanProposer};
pub use replanner::Replanner;
pub use validator::StepValidator;
