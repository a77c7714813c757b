//! Task transition model: append-only state log rows for tasks.
//!
//! `sort_key` is a per-task monotonic integer allocated as `max + 1` inside
//! the writing transaction; the unique index on `(task_id, sort_key)` stops
//! concurrent writers from interleaving.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskTransition {
    pub task_transition_id: i64,
    pub task_id: i64,
    pub from_state: Option<String>,
    pub to_state: String,
    pub sort_key: i32,
    pub metadata: Option<Value>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewTaskTransition {
    pub task_id: i64,
    pub from_state: Option<String>,
    pub to_state: String,
    pub metadata: Option<Value>,
}

impl TaskTransition {
    /// Append a transition row, allocating the next sort key. Callers hold
    /// the task row lock; the unique index is the concurrency backstop.
    /// An empty `from_state` is normalized to NULL.
    pub async fn create(
        conn: &mut PgConnection,
        new_transition: NewTaskTransition,
    ) -> Result<Self, sqlx::Error> {
        let from_state = new_transition.from_state.filter(|s| !s.is_empty());
        sqlx::query_as::<_, TaskTransition>(
            "INSERT INTO task_transitions (task_id, from_state, to_state, sort_key, metadata, created_at) \
             VALUES ($1, $2, $3, \
                     (SELECT COALESCE(MAX(sort_key), 0) + 1 FROM task_transitions WHERE task_id = $1), \
                     $4, NOW()) \
             RETURNING *",
        )
        .bind(new_transition.task_id)
        .bind(from_state)
        .bind(&new_transition.to_state)
        .bind(new_transition.metadata)
        .fetch_one(conn)
        .await
    }

    /// Latest transition's `to_state`; None means the log is empty and the
    /// task is `pending`.
    pub async fn current_state_label(
        conn: &mut PgConnection,
        task_id: i64,
    ) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT to_state FROM task_transitions WHERE task_id = $1 \
             ORDER BY sort_key DESC LIMIT 1",
        )
        .bind(task_id)
        .fetch_optional(conn)
        .await?;
        Ok(row.map(|(state,)| state))
    }

    pub async fn most_recent(pool: &PgPool, task_id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, TaskTransition>(
            "SELECT * FROM task_transitions WHERE task_id = $1 ORDER BY sort_key DESC LIMIT 1",
        )
        .bind(task_id)
        .fetch_optional(pool)
        .await
    }

    /// Most recent transition into the given state, if any
    pub async fn most_recent_to(
        pool: &PgPool,
        task_id: i64,
        state: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, TaskTransition>(
            "SELECT * FROM task_transitions WHERE task_id = $1 AND to_state = $2 \
             ORDER BY sort_key DESC LIMIT 1",
        )
        .bind(task_id)
        .bind(state)
        .fetch_optional(pool)
        .await
    }

    /// Full log in insertion order
    pub async fn list_for_task(pool: &PgPool, task_id: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, TaskTransition>(
            "SELECT * FROM task_transitions WHERE task_id = $1 ORDER BY sort_key",
        )
        .bind(task_id)
        .fetch_all(pool)
        .await
    }

    /// Wall time spent in the previous state (None for the first transition)
    pub async fn duration_since_previous(
        &self,
        pool: &PgPool,
    ) -> Result<Option<chrono::Duration>, sqlx::Error> {
        let previous: Option<(NaiveDateTime,)> = sqlx::query_as(
            "SELECT created_at FROM task_transitions \
             WHERE task_id = $1 AND sort_key < $2 \
             ORDER BY sort_key DESC LIMIT 1",
        )
        .bind(self.task_id)
        .bind(self.sort_key)
        .fetch_optional(pool)
        .await?;
        Ok(previous.map(|(created_at,)| self.created_at - created_at))
    }
}
