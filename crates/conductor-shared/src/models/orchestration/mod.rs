//! Read-only projections consumed by the orchestration loop.

pub mod execution_context;
pub mod step_readiness;
pub mod workflow_summary;

pub use execution_context::{
    ExecutionContextCounts, ExecutionStatus, HealthStatus, RecommendedAction, TaskExecutionContext,
};
pub use step_readiness::StepReadinessStatus;
pub use workflow_summary::{BlockedStep, ParallelismPotential, TaskWorkflowSummary};
