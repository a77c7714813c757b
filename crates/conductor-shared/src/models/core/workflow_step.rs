//! Workflow step model: one node in a task's DAG.
//!
//! Step rows are mutated only by the executor and the state machine. The
//! `processed` flag duplicates "latest transition is complete" so the
//! readiness query can filter on it without touching the transition log;
//! the transition log stays the source of truth for state.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkflowStep {
    pub workflow_step_id: i64,
    pub task_id: i64,
    pub named_step_id: i64,
    pub sort_key: i32,
    pub retry_limit: i32,
    pub retryable: bool,
    pub skippable: bool,
    pub attempts: i32,
    pub in_process: bool,
    pub processed: bool,
    pub processed_at: Option<NaiveDateTime>,
    pub last_attempted_at: Option<NaiveDateTime>,
    pub backoff_request_seconds: Option<i32>,
    pub inputs: Option<Value>,
    pub results: Option<Value>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Insert payload for task instantiation
#[derive(Debug, Clone)]
pub struct NewWorkflowStep {
    pub task_id: i64,
    pub named_step_id: i64,
    pub sort_key: i32,
    pub retry_limit: i32,
    pub retryable: bool,
    pub skippable: bool,
    pub inputs: Option<Value>,
}

impl WorkflowStep {
    pub async fn create(pool: &PgPool, new_step: NewWorkflowStep) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, WorkflowStep>(
            "INSERT INTO workflow_steps \
             (task_id, named_step_id, sort_key, retry_limit, retryable, skippable, inputs, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW()) \
             RETURNING *",
        )
        .bind(new_step.task_id)
        .bind(new_step.named_step_id)
        .bind(new_step.sort_key)
        .bind(new_step.retry_limit)
        .bind(new_step.retryable)
        .bind(new_step.skippable)
        .bind(new_step.inputs)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        workflow_step_id: i64,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowStep>(
            "SELECT * FROM workflow_steps WHERE workflow_step_id = $1",
        )
        .bind(workflow_step_id)
        .fetch_optional(pool)
        .await
    }

    /// All steps of a task in dispatch order
    pub async fn list_by_task(pool: &PgPool, task_id: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowStep>(
            "SELECT * FROM workflow_steps WHERE task_id = $1 \
             ORDER BY sort_key, workflow_step_id",
        )
        .bind(task_id)
        .fetch_all(pool)
        .await
    }

    /// Lookup a step of a task by its named step's name
    pub async fn find_step_by_name(
        pool: &PgPool,
        task_id: i64,
        step_name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowStep>(
            "SELECT ws.* FROM workflow_steps ws \
             JOIN named_steps ns ON ns.named_step_id = ws.named_step_id \
             WHERE ws.task_id = $1 AND ns.name = $2",
        )
        .bind(task_id)
        .bind(step_name)
        .fetch_optional(pool)
        .await
    }

    /// Claim bookkeeping inside the executor's claim transaction: one more
    /// attempt, flagged in-process, stamped with the attempt time.
    pub async fn record_claim(&self, conn: &mut PgConnection) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE workflow_steps \
             SET attempts = attempts + 1, in_process = TRUE, last_attempted_at = NOW(), \
                 updated_at = NOW() \
             WHERE workflow_step_id = $1",
        )
        .bind(self.workflow_step_id)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Success bookkeeping inside the outcome transaction
    pub async fn record_success(
        &self,
        conn: &mut PgConnection,
        results: Option<&Value>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE workflow_steps \
             SET processed = TRUE, processed_at = NOW(), results = $2, \
                 in_process = FALSE, backoff_request_seconds = NULL, updated_at = NOW() \
             WHERE workflow_step_id = $1",
        )
        .bind(self.workflow_step_id)
        .bind(results)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Retryable-failure bookkeeping: store the computed backoff and release
    /// the in-process guard.
    pub async fn record_retryable_failure(
        &self,
        conn: &mut PgConnection,
        backoff_request_seconds: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE workflow_steps \
             SET backoff_request_seconds = $2, in_process = FALSE, updated_at = NOW() \
             WHERE workflow_step_id = $1",
        )
        .bind(self.workflow_step_id)
        .bind(backoff_request_seconds)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Permanent-failure bookkeeping: the step will never be retried
    pub async fn record_permanent_failure(
        &self,
        conn: &mut PgConnection,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE workflow_steps \
             SET retryable = FALSE, in_process = FALSE, backoff_request_seconds = NULL, \
                 updated_at = NOW() \
             WHERE workflow_step_id = $1",
        )
        .bind(self.workflow_step_id)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Release the in-process guard without recording an outcome
    pub async fn clear_in_process(&self, conn: &mut PgConnection) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE workflow_steps SET in_process = FALSE, updated_at = NOW() \
             WHERE workflow_step_id = $1",
        )
        .bind(self.workflow_step_id)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Store results and flag processed outside the executor path (used by
    /// tests and manual resolution tooling).
    pub async fn mark_processed(
        &mut self,
        pool: &PgPool,
        results: Option<Value>,
    ) -> Result<(), sqlx::Error> {
        let updated = sqlx::query_as::<_, WorkflowStep>(
            "UPDATE workflow_steps \
             SET processed = TRUE, processed_at = NOW(), results = $2, in_process = FALSE, \
                 updated_at = NOW() \
             WHERE workflow_step_id = $1 \
             RETURNING *",
        )
        .bind(self.workflow_step_id)
        .bind(results)
        .fetch_one(pool)
        .await?;
        *self = updated;
        Ok(())
    }
}
