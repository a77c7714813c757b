//! Step readiness projection.
//!
//! One row per step answering "may this step be dispatched right now", with
//! the inputs to that decision exposed so callers can explain a blocked step
//! without more queries. Produced by the readiness query; plain values, no
//! mutability.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StepReadinessStatus {
    pub workflow_step_id: i64,
    pub task_id: i64,
    pub named_step_id: i64,
    /// Named step name (for logs and handler resolution)
    pub name: String,
    /// Dispatch ordering inside the task
    pub sort_key: i32,
    pub current_state: String,
    /// Every parent is complete (or bypassed-and-skippable)
    pub dependencies_satisfied: bool,
    pub total_parents: i64,
    pub completed_parents: i64,
    pub attempts: i32,
    pub retry_limit: i32,
    pub retryable: bool,
    /// Attempt budget remaining (first attempt always granted)
    pub retry_eligible: bool,
    pub next_retry_at: Option<NaiveDateTime>,
    pub last_failure_at: Option<NaiveDateTime>,
    pub backoff_request_seconds: Option<i32>,
    pub last_attempted_at: Option<NaiveDateTime>,
    pub in_process: bool,
    pub processed: bool,
    pub ready_for_execution: bool,
}

impl StepReadinessStatus {
    /// Human-readable reason a non-ready step is blocked
    pub fn blocking_reason(&self) -> Option<&'static str> {
        if self.ready_for_execution {
            return None;
        }
        if self.processed || self.current_state == "complete" {
            return Some("already_complete");
        }
        if self.current_state == "cancelled" || self.current_state == "resolved_manually" {
            return Some("terminal");
        }
        if self.in_process || self.current_state == "in_progress" {
            return Some("in_process");
        }
        if !self.retryable {
            return Some("not_retryable");
        }
        if !self.retry_eligible {
            return Some("retries_exhausted");
        }
        if !self.dependencies_satisfied {
            return Some("dependencies_pending");
        }
        Some("in_backoff")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_row() -> StepReadinessStatus {
        StepReadinessStatus {
            workflow_step_id: 1,
            task_id: 1,
            named_step_id: 1,
            name: "fetch_data".to_string(),
            sort_key: 0,
            current_state: "pending".to_string(),
            dependencies_satisfied: true,
            total_parents: 0,
            completed_parents: 0,
            attempts: 0,
            retry_limit: 3,
            retryable: true,
            retry_eligible: true,
            next_retry_at: None,
            last_failure_at: None,
            backoff_request_seconds: None,
            last_attempted_at: None,
            in_process: false,
            processed: false,
            ready_for_execution: true,
        }
    }

    #[test]
    fn test_ready_step_has_no_blocking_reason() {
        assert_eq!(ready_row().blocking_reason(), None);
    }

    #[test]
    fn test_blocking_reason_dependencies() {
        let mut row = ready_row();
        row.dependencies_satisfied = false;
        row.ready_for_execution = false;
        assert_eq!(row.blocking_reason(), Some("dependencies_pending"));
    }

    #[test]
    fn test_blocking_reason_retries_exhausted() {
        let mut row = ready_row();
        row.current_state = "error".to_string();
        row.attempts = 3;
        row.retry_eligible = false;
        row.ready_for_execution = false;
        assert_eq!(row.blocking_reason(), Some("retries_exhausted"));
    }

    #[test]
    fn test_blocking_reason_not_retryable_wins_over_exhaustion() {
        let mut row = ready_row();
        row.current_state = "error".to_string();
        row.retryable = false;
        row.retry_eligible = false;
        row.ready_for_execution = false;
        assert_eq!(row.blocking_reason(), Some("not_retryable"));
    }

    #[test]
    fn test_blocking_reason_in_backoff() {
        let mut row = ready_row();
        row.current_state = "error".to_string();
        row.attempts = 1;
        row.ready_for_execution = false;
        assert_eq!(row.blocking_reason(), Some("in_backoff"));
    }

    #[test]
    fn test_blocking_reason_in_process() {
        let mut row = ready_row();
        row.current_state = "in_progress".to_string();
        row.in_process = true;
        row.ready_for_execution = false;
        assert_eq!(row.blocking_reason(), Some("in_process"));
    }
}
