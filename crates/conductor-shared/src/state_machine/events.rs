//! State machine events.
//!
//! Events name the *cause* of a transition; each resolves to a target state
//! plus the metadata recorded on the transition row.

use serde_json::{json, Value};

use super::states::{TaskState, WorkflowStepState};

/// Events accepted by the task state machine
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// Begin (or resume after error) processing
    Start,
    /// All steps reached `complete`
    Complete,
    /// Blocked by failures; carries the failure summary
    Fail(String),
    /// Operator or caller cancelled the task
    Cancel,
    /// Operator resolved a failed task out of band
    ResolveManually,
}

impl TaskEvent {
    /// State this event drives the task into
    pub fn target_state(&self) -> TaskState {
        match self {
            TaskEvent::Start => TaskState::InProgress,
            TaskEvent::Complete => TaskState::Complete,
            TaskEvent::Fail(_) => TaskState::Error,
            TaskEvent::Cancel => TaskState::Cancelled,
            TaskEvent::ResolveManually => TaskState::ResolvedManually,
        }
    }

    /// Metadata recorded on the transition row
    pub fn metadata(&self) -> Option<Value> {
        match self {
            TaskEvent::Fail(reason) => Some(json!({ "error": reason })),
            _ => None,
        }
    }
}

/// Events accepted by the step state machine
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    /// Claimed for execution; records the 1-indexed attempt number
    Start { attempt_number: i32 },
    /// Handler returned successfully; results are stored on the step row
    Complete(Option<Value>),
    /// Handler failed; `permanent` failures are never retried
    Fail { message: String, permanent: bool },
    /// Failed step re-armed for another attempt
    Retry { attempt_number: i32 },
    /// Step cancelled alongside its task
    Cancel,
    /// Operator resolved a failed step out of band
    ResolveManually,
}

impl StepEvent {
    pub fn target_state(&self) -> WorkflowStepState {
        match self {
            StepEvent::Start { .. } => WorkflowStepState::InProgress,
            StepEvent::Complete(_) => WorkflowStepState::Complete,
            StepEvent::Fail { .. } => WorkflowStepState::Error,
            StepEvent::Retry { .. } => WorkflowStepState::Pending,
            StepEvent::Cancel => WorkflowStepState::Cancelled,
            StepEvent::ResolveManually => WorkflowStepState::ResolvedManually,
        }
    }

    pub fn metadata(&self) -> Option<Value> {
        match self {
            StepEvent::Start { attempt_number } => {
                Some(json!({ "attempt_number": attempt_number }))
            }
            StepEvent::Fail { message, permanent } => {
                if *permanent {
                    Some(json!({ "error": message, "permanent": true }))
                } else {
                    Some(json!({ "error": message }))
                }
            }
            // `retry_attempt` present classifies the transition as a retry
            StepEvent::Retry { attempt_number } => {
                Some(json!({ "retry_attempt": attempt_number }))
            }
            StepEvent::Complete(_) | StepEvent::Cancel | StepEvent::ResolveManually => None,
        }
    }

    /// Whether this event is the `error -> pending` retry edge
    pub fn is_retry(&self) -> bool {
        matches!(self, StepEvent::Retry { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_event_targets() {
        assert_eq!(TaskEvent::Start.target_state(), TaskState::InProgress);
        assert_eq!(TaskEvent::Complete.target_state(), TaskState::Complete);
        assert_eq!(
            TaskEvent::Fail("boom".to_string()).target_state(),
            TaskState::Error
        );
        assert_eq!(TaskEvent::Cancel.target_state(), TaskState::Cancelled);
        assert_eq!(
            TaskEvent::ResolveManually.target_state(),
            TaskState::ResolvedManually
        );
    }

    #[test]
    fn test_fail_metadata_carries_error() {
        let metadata = TaskEvent::Fail("two steps exhausted retries".to_string())
            .metadata()
            .expect("metadata");
        assert_eq!(metadata["error"], "two steps exhausted retries");
    }

    #[test]
    fn test_retry_event_is_classified() {
        let event = StepEvent::Retry { attempt_number: 2 };
        assert!(event.is_retry());
        assert_eq!(event.target_state(), WorkflowStepState::Pending);
        let metadata = event.metadata().expect("metadata");
        assert_eq!(metadata["retry_attempt"], 2);
    }

    #[test]
    fn test_permanent_failure_metadata() {
        let event = StepEvent::Fail {
            message: "422 unprocessable".to_string(),
            permanent: true,
        };
        let metadata = event.metadata().expect("metadata");
        assert_eq!(metadata["permanent"], true);
        assert_eq!(metadata["error"], "422 unprocessable");
    }

    #[test]
    fn test_transient_failure_has_no_permanent_marker() {
        let event = StepEvent::Fail {
            message: "503 unavailable".to_string(),
            permanent: false,
        };
        let metadata = event.metadata().expect("metadata");
        assert!(metadata.get("permanent").is_none());
    }

    #[test]
    fn test_start_metadata_records_attempt() {
        let metadata = StepEvent::Start { attempt_number: 3 }
            .metadata()
            .expect("metadata");
        assert_eq!(metadata["attempt_number"], 3);
    }
}
