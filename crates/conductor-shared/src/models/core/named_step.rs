//! Named step model: a reusable step definition scoped to a dependent system.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NamedStep {
    pub named_step_id: i64,
    pub dependent_system_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NamedStep {
    pub async fn find_or_create(
        pool: &PgPool,
        dependent_system_id: i64,
        name: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, NamedStep>(
            "INSERT INTO named_steps (dependent_system_id, name, created_at, updated_at) \
             VALUES ($1, $2, NOW(), NOW()) \
             ON CONFLICT (dependent_system_id, name) DO UPDATE SET updated_at = NOW() \
             RETURNING *",
        )
        .bind(dependent_system_id)
        .bind(name)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, named_step_id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, NamedStep>("SELECT * FROM named_steps WHERE named_step_id = $1")
            .bind(named_step_id)
            .fetch_optional(pool)
            .await
    }
}
