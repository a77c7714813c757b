//! Workflow step edge model: a dependency inside one task's DAG.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

pub const DEFAULT_EDGE_NAME: &str = "provides";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkflowStepEdge {
    pub workflow_step_edge_id: i64,
    pub from_step_id: i64,
    pub to_step_id: i64,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl WorkflowStepEdge {
    pub async fn create(
        pool: &PgPool,
        from_step_id: i64,
        to_step_id: i64,
        name: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, WorkflowStepEdge>(
            "INSERT INTO workflow_step_edges (from_step_id, to_step_id, name, created_at, updated_at) \
             VALUES ($1, $2, $3, NOW(), NOW()) \
             RETURNING *",
        )
        .bind(from_step_id)
        .bind(to_step_id)
        .bind(name)
        .fetch_one(pool)
        .await
    }

    /// All edges between steps of one task
    pub async fn list_by_task(pool: &PgPool, task_id: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowStepEdge>(
            "SELECT e.* FROM workflow_step_edges e \
             JOIN workflow_steps ws ON ws.workflow_step_id = e.from_step_id \
             WHERE ws.task_id = $1 \
             ORDER BY e.workflow_step_edge_id",
        )
        .bind(task_id)
        .fetch_all(pool)
        .await
    }

    /// Parent step ids of one step
    pub async fn parent_ids(pool: &PgPool, to_step_id: i64) -> Result<Vec<i64>, sqlx::Error> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT from_step_id FROM workflow_step_edges WHERE to_step_id = $1",
        )
        .bind(to_step_id)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
