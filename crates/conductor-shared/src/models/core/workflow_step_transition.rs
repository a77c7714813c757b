//! Workflow step transition model: append-only state log rows for steps.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkflowStepTransition {
    pub workflow_step_transition_id: i64,
    pub workflow_step_id: i64,
    pub from_state: Option<String>,
    pub to_state: String,
    pub sort_key: i32,
    pub metadata: Option<Value>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewWorkflowStepTransition {
    pub workflow_step_id: i64,
    pub from_state: Option<String>,
    pub to_state: String,
    pub metadata: Option<Value>,
}

impl WorkflowStepTransition {
    /// Append a transition row, allocating the next sort key under the step
    /// row lock held by the caller. An empty `from_state` normalizes to NULL.
    pub async fn create(
        conn: &mut PgConnection,
        new_transition: NewWorkflowStepTransition,
    ) -> Result<Self, sqlx::Error> {
        let from_state = new_transition.from_state.filter(|s| !s.is_empty());
        sqlx::query_as::<_, WorkflowStepTransition>(
            "INSERT INTO workflow_step_transitions \
             (workflow_step_id, from_state, to_state, sort_key, metadata, created_at) \
             VALUES ($1, $2, $3, \
                     (SELECT COALESCE(MAX(sort_key), 0) + 1 FROM workflow_step_transitions \
                      WHERE workflow_step_id = $1), \
                     $4, NOW()) \
             RETURNING *",
        )
        .bind(new_transition.workflow_step_id)
        .bind(from_state)
        .bind(&new_transition.to_state)
        .bind(new_transition.metadata)
        .fetch_one(conn)
        .await
    }

    pub async fn current_state_label(
        conn: &mut PgConnection,
        workflow_step_id: i64,
    ) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT to_state FROM workflow_step_transitions WHERE workflow_step_id = $1 \
             ORDER BY sort_key DESC LIMIT 1",
        )
        .bind(workflow_step_id)
        .fetch_optional(conn)
        .await?;
        Ok(row.map(|(state,)| state))
    }

    pub async fn most_recent(
        pool: &PgPool,
        workflow_step_id: i64,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowStepTransition>(
            "SELECT * FROM workflow_step_transitions WHERE workflow_step_id = $1 \
             ORDER BY sort_key DESC LIMIT 1",
        )
        .bind(workflow_step_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn most_recent_to(
        pool: &PgPool,
        workflow_step_id: i64,
        state: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowStepTransition>(
            "SELECT * FROM workflow_step_transitions \
             WHERE workflow_step_id = $1 AND to_state = $2 \
             ORDER BY sort_key DESC LIMIT 1",
        )
        .bind(workflow_step_id)
        .bind(state)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_for_step(
        pool: &PgPool,
        workflow_step_id: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowStepTransition>(
            "SELECT * FROM workflow_step_transitions WHERE workflow_step_id = $1 \
             ORDER BY sort_key",
        )
        .bind(workflow_step_id)
        .fetch_all(pool)
        .await
    }

    /// Wall time spent in the previous state (None for the first transition)
    pub async fn duration_since_previous(
        &self,
        pool: &PgPool,
    ) -> Result<Option<chrono::Duration>, sqlx::Error> {
        let previous: Option<(NaiveDateTime,)> = sqlx::query_as(
            "SELECT created_at FROM workflow_step_transitions \
             WHERE workflow_step_id = $1 AND sort_key < $2 \
             ORDER BY sort_key DESC LIMIT 1",
        )
        .bind(self.workflow_step_id)
        .bind(self.sort_key)
        .fetch_optional(pool)
        .await?;
        Ok(previous.map(|(created_at,)| self.created_at - created_at))
    }

    /// Whether this transition is the `error -> pending` retry edge
    pub fn is_retry(&self) -> bool {
        self.to_state == "pending"
            && self.from_state.as_deref() == Some("error")
            && self
                .metadata
                .as_ref()
                .map(|m| m.get("retry_attempt").is_some())
                .unwrap_or(false)
    }
}
