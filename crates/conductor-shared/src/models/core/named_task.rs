//! Named task model: a registered workflow at a specific semver version.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NamedTask {
    pub named_task_id: i64,
    pub task_namespace_id: i64,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub configuration: Option<Value>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NamedTask {
    pub async fn find_or_create(
        pool: &PgPool,
        task_namespace_id: i64,
        name: &str,
        version: &str,
        configuration: Option<Value>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, NamedTask>(
            "INSERT INTO named_tasks (task_namespace_id, name, version, configuration, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, NOW(), NOW()) \
             ON CONFLICT (task_namespace_id, name, version) DO UPDATE SET updated_at = NOW() \
             RETURNING *",
        )
        .bind(task_namespace_id)
        .bind(name)
        .bind(version)
        .bind(configuration)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, named_task_id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, NamedTask>("SELECT * FROM named_tasks WHERE named_task_id = $1")
            .bind(named_task_id)
            .fetch_optional(pool)
            .await
    }

    /// Qualified (namespace, name, version) of the named task behind a task
    /// instance, for template resolution during execution.
    pub async fn qualified_name_for_task(
        pool: &PgPool,
        task_id: i64,
    ) -> Result<Option<(String, String, String)>, sqlx::Error> {
        sqlx::query_as(
            "SELECT ns.name, nt.name, nt.version \
             FROM tasks t \
             JOIN named_tasks nt ON nt.named_task_id = t.named_task_id \
             JOIN task_namespaces ns ON ns.task_namespace_id = nt.task_namespace_id \
             WHERE t.task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(pool)
        .await
    }

    /// Lookup by (namespace name, task name, version)
    pub async fn find_by_full_name(
        pool: &PgPool,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, NamedTask>(
            "SELECT nt.* FROM named_tasks nt \
             JOIN task_namespaces ns ON ns.task_namespace_id = nt.task_namespace_id \
             WHERE ns.name = $1 AND nt.name = $2 AND nt.version = $3",
        )
        .bind(namespace)
        .bind(name)
        .bind(version)
        .fetch_optional(pool)
        .await
    }
}

/// Template-level association between a named task and one of its steps,
/// carrying the step defaults applied at instantiation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NamedTasksNamedStep {
    pub named_tasks_named_step_id: i64,
    pub named_task_id: i64,
    pub named_step_id: i64,
    pub skippable: bool,
    pub default_retryable: bool,
    pub default_retry_limit: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NamedTasksNamedStep {
    #[allow(clippy::too_many_arguments)]
    pub async fn find_or_create(
        pool: &PgPool,
        named_task_id: i64,
        named_step_id: i64,
        skippable: bool,
        default_retryable: bool,
        default_retry_limit: i32,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, NamedTasksNamedStep>(
            "INSERT INTO named_tasks_named_steps \
             (named_task_id, named_step_id, skippable, default_retryable, default_retry_limit, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, NOW(), NOW()) \
             ON CONFLICT (named_task_id, named_step_id) DO UPDATE \
             SET skippable = $3, default_retryable = $4, default_retry_limit = $5, updated_at = NOW() \
             RETURNING *",
        )
        .bind(named_task_id)
        .bind(named_step_id)
        .bind(skippable)
        .bind(default_retryable)
        .bind(default_retry_limit)
        .fetch_one(pool)
        .await
    }

    pub async fn list_for_named_task(
        pool: &PgPool,
        named_task_id: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, NamedTasksNamedStep>(
            "SELECT * FROM named_tasks_named_steps WHERE named_task_id = $1 \
             ORDER BY named_tasks_named_step_id",
        )
        .bind(named_task_id)
        .fetch_all(pool)
        .await
    }
}
