//! Task and step state enums with the allowed-transition tables.
//!
//! Current state is always derived from the transition log; an entity with
//! no transitions is `pending`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle states for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InProgress,
    Complete,
    Error,
    Cancelled,
    ResolvedManually,
}

impl TaskState {
    /// States from which no further transition is allowed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Complete | TaskState::Cancelled | TaskState::ResolvedManually
        )
    }

    /// Whether `self -> to` appears in the transition table
    pub fn can_transition_to(&self, to: TaskState) -> bool {
        matches!(
            (self, to),
            (TaskState::Pending, TaskState::InProgress)
                | (TaskState::Pending, TaskState::Cancelled)
                | (TaskState::InProgress, TaskState::Complete)
                | (TaskState::InProgress, TaskState::Error)
                | (TaskState::InProgress, TaskState::Cancelled)
                | (TaskState::Error, TaskState::InProgress)
                | (TaskState::Error, TaskState::ResolvedManually)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskState::Pending => "pending",
            TaskState::InProgress => "in_progress",
            TaskState::Complete => "complete",
            TaskState::Error => "error",
            TaskState::Cancelled => "cancelled",
            TaskState::ResolvedManually => "resolved_manually",
        };
        write!(f, "{label}")
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(TaskState::Pending),
            "in_progress" => Ok(TaskState::InProgress),
            "complete" => Ok(TaskState::Complete),
            "error" => Ok(TaskState::Error),
            "cancelled" => Ok(TaskState::Cancelled),
            "resolved_manually" => Ok(TaskState::ResolvedManually),
            other => Err(format!("unknown task state: {other}")),
        }
    }
}

/// Lifecycle states for a workflow step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStepState {
    Pending,
    InProgress,
    Complete,
    Error,
    Cancelled,
    ResolvedManually,
}

impl WorkflowStepState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStepState::Complete
                | WorkflowStepState::Cancelled
                | WorkflowStepState::ResolvedManually
        )
    }

    /// Whether `self -> to` appears in the transition table.
    ///
    /// `error -> pending` is the retry edge; the transition carries
    /// `retry_attempt` metadata and increments the step's attempt counter.
    pub fn can_transition_to(&self, to: WorkflowStepState) -> bool {
        matches!(
            (self, to),
            (WorkflowStepState::Pending, WorkflowStepState::InProgress)
                | (WorkflowStepState::Pending, WorkflowStepState::Cancelled)
                | (WorkflowStepState::InProgress, WorkflowStepState::Complete)
                | (WorkflowStepState::InProgress, WorkflowStepState::Error)
                | (WorkflowStepState::InProgress, WorkflowStepState::Cancelled)
                | (WorkflowStepState::Error, WorkflowStepState::Pending)
                | (WorkflowStepState::Error, WorkflowStepState::ResolvedManually)
                | (WorkflowStepState::Error, WorkflowStepState::Cancelled)
        )
    }
}

impl fmt::Display for WorkflowStepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkflowStepState::Pending => "pending",
            WorkflowStepState::InProgress => "in_progress",
            WorkflowStepState::Complete => "complete",
            WorkflowStepState::Error => "error",
            WorkflowStepState::Cancelled => "cancelled",
            WorkflowStepState::ResolvedManually => "resolved_manually",
        };
        write!(f, "{label}")
    }
}

impl FromStr for WorkflowStepState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(WorkflowStepState::Pending),
            "in_progress" => Ok(WorkflowStepState::InProgress),
            "complete" => Ok(WorkflowStepState::Complete),
            "error" => Ok(WorkflowStepState::Error),
            "cancelled" => Ok(WorkflowStepState::Cancelled),
            "resolved_manually" => Ok(WorkflowStepState::ResolvedManually),
            other => Err(format!("unknown workflow step state: {other}")),
        }
    }
}
