//! Task execution context: aggregated per-task status.
//!
//! The counts come from the readiness query in one round trip; the derived
//! labels (`execution_status`, `health_status`, `recommended_action`) are
//! pure functions over those counts so they can be exercised without a
//! database.

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Aggregate execution state of one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    AllComplete,
    BlockedByFailures,
    HasReadySteps,
    Processing,
    WaitingForDependencies,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutionStatus::AllComplete => "all_complete",
            ExecutionStatus::BlockedByFailures => "blocked_by_failures",
            ExecutionStatus::HasReadySteps => "has_ready_steps",
            ExecutionStatus::Processing => "processing",
            ExecutionStatus::WaitingForDependencies => "waiting_for_dependencies",
        };
        write!(f, "{label}")
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "all_complete" => Ok(ExecutionStatus::AllComplete),
            "blocked_by_failures" => Ok(ExecutionStatus::BlockedByFailures),
            "has_ready_steps" => Ok(ExecutionStatus::HasReadySteps),
            "processing" => Ok(ExecutionStatus::Processing),
            "waiting_for_dependencies" => Ok(ExecutionStatus::WaitingForDependencies),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Coarse health label derived from the same counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Recovering,
    Blocked,
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Recovering => "recovering",
            HealthStatus::Blocked => "blocked",
            HealthStatus::Unknown => "unknown",
        };
        write!(f, "{label}")
    }
}

/// What the orchestrator should do next with this task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    FinalizeTask,
    HandleFailures,
    ExecuteReadySteps,
    WaitForCompletion,
    WaitForDependencies,
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecommendedAction::FinalizeTask => "finalize_task",
            RecommendedAction::HandleFailures => "handle_failures",
            RecommendedAction::ExecuteReadySteps => "execute_ready_steps",
            RecommendedAction::WaitForCompletion => "wait_for_completion",
            RecommendedAction::WaitForDependencies => "wait_for_dependencies",
        };
        write!(f, "{label}")
    }
}

/// Raw per-task counts from the readiness query
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct ExecutionContextCounts {
    pub total_steps: i64,
    pub pending_steps: i64,
    pub in_progress_steps: i64,
    pub completed_steps: i64,
    pub failed_steps: i64,
    pub ready_steps: i64,
    /// Failed steps with no retry path left (budget spent or not retryable)
    pub exhausted_failures: i64,
    /// Earliest next-eligible time over failed-but-retry-eligible steps
    pub min_next_retry_at: Option<NaiveDateTime>,
}

impl ExecutionContextCounts {
    /// Derived execution status per the readiness contract
    pub fn execution_status(&self) -> ExecutionStatus {
        if self.total_steps > 0 && self.completed_steps == self.total_steps {
            ExecutionStatus::AllComplete
        } else if self.failed_steps > 0 && self.ready_steps == 0 && self.exhausted_failures > 0 {
            ExecutionStatus::BlockedByFailures
        } else if self.ready_steps > 0 {
            ExecutionStatus::HasReadySteps
        } else if self.in_progress_steps > 0 {
            ExecutionStatus::Processing
        } else {
            ExecutionStatus::WaitingForDependencies
        }
    }

    pub fn health_status(&self) -> HealthStatus {
        match self.execution_status() {
            ExecutionStatus::AllComplete => HealthStatus::Healthy,
            ExecutionStatus::BlockedByFailures => HealthStatus::Blocked,
            _ if self.failed_steps > 0 => HealthStatus::Recovering,
            _ if self.total_steps == 0 => HealthStatus::Unknown,
            _ => HealthStatus::Healthy,
        }
    }

    pub fn recommended_action(&self) -> RecommendedAction {
        match self.execution_status() {
            ExecutionStatus::AllComplete => RecommendedAction::FinalizeTask,
            ExecutionStatus::BlockedByFailures => RecommendedAction::HandleFailures,
            ExecutionStatus::HasReadySteps => RecommendedAction::ExecuteReadySteps,
            ExecutionStatus::Processing => RecommendedAction::WaitForCompletion,
            ExecutionStatus::WaitingForDependencies => RecommendedAction::WaitForDependencies,
        }
    }

    pub fn completion_percentage(&self) -> BigDecimal {
        if self.total_steps == 0 {
            return BigDecimal::from(0);
        }
        let ratio = (self.completed_steps as f64 / self.total_steps as f64) * 100.0;
        // two decimal places is plenty for a progress figure
        BigDecimal::try_from(ratio)
            .map(|d| d.with_scale(2))
            .unwrap_or_else(|_| BigDecimal::from(0))
    }
}

/// Aggregated execution context for one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionContext {
    pub task_id: i64,
    pub named_task_id: i64,
    pub total_steps: i64,
    pub pending_steps: i64,
    pub in_progress_steps: i64,
    pub completed_steps: i64,
    pub failed_steps: i64,
    pub ready_steps: i64,
    pub execution_status: ExecutionStatus,
    pub health_status: HealthStatus,
    pub recommended_action: RecommendedAction,
    pub completion_percentage: BigDecimal,
    /// Earliest next-eligible time over failed-but-retry-eligible steps
    pub min_next_retry_at: Option<NaiveDateTime>,
}

impl TaskExecutionContext {
    pub fn from_counts(task_id: i64, named_task_id: i64, counts: &ExecutionContextCounts) -> Self {
        Self {
            task_id,
            named_task_id,
            total_steps: counts.total_steps,
            pending_steps: counts.pending_steps,
            in_progress_steps: counts.in_progress_steps,
            completed_steps: counts.completed_steps,
            failed_steps: counts.failed_steps,
            ready_steps: counts.ready_steps,
            execution_status: counts.execution_status(),
            health_status: counts.health_status(),
            recommended_action: counts.recommended_action(),
            completion_percentage: counts.completion_percentage(),
            min_next_retry_at: counts.min_next_retry_at,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.execution_status == ExecutionStatus::AllComplete
    }

    pub fn is_blocked(&self) -> bool {
        self.execution_status == ExecutionStatus::BlockedByFailures
    }

    pub fn has_failures(&self) -> bool {
        self.failed_steps > 0
    }
}
