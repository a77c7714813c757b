//! Task namespace model

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// A namespace groups named tasks (e.g. `fulfillment`, `billing`)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskNamespace {
    pub task_namespace_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl TaskNamespace {
    /// Create the namespace if absent, returning the row either way
    pub async fn find_or_create(pool: &PgPool, name: &str) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, TaskNamespace>(
            "INSERT INTO task_namespaces (name, created_at, updated_at) \
             VALUES ($1, NOW(), NOW()) \
             ON CONFLICT (name) DO UPDATE SET updated_at = NOW() \
             RETURNING *",
        )
        .bind(name)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, TaskNamespace>("SELECT * FROM task_namespaces WHERE name = $1")
            .bind(name)
            .fetch_optional(pool)
            .await
    }
}
