//! Task model: a live instance of a named task.
//!
//! A task exclusively owns its workflow steps, edges, and transition rows.
//! The `identity_hash` is the duplicate-submission guard: a canonical hash
//! over the semantically identifying request fields, unique across tasks.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use super::task_request::TaskRequest;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub task_id: i64,
    pub named_task_id: i64,
    pub complete: bool,
    pub requested_at: NaiveDateTime,
    pub initiator: Option<String>,
    pub source_system: Option<String>,
    pub reason: Option<String>,
    pub context: Option<Value>,
    pub tags: Vec<String>,
    pub bypass_steps: Vec<String>,
    pub identity_hash: String,
    pub correlation_id: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Failure summary for one errored step, surfaced on terminal-error tasks
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StepFailureDetail {
    pub workflow_step_id: i64,
    pub step_name: String,
    pub attempts: i32,
    pub retry_limit: i32,
    pub last_failure_at: Option<NaiveDateTime>,
    /// Last error message, from the latest `error` transition's metadata
    pub error_message: Option<String>,
}

/// Recursively sort object keys so semantically equal payloads hash equal
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (key, inner) in sorted {
                out.insert(key.clone(), canonicalize(inner));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

impl Task {
    /// Compute the identity hash for a request: hex SHA-256 of a canonical
    /// JSON encoding of the identifying fields, with `requested_at`
    /// truncated to the minute.
    pub fn identity_hash_for(request: &TaskRequest) -> String {
        let mut identity = serde_json::Map::new();
        identity.insert("name".to_string(), Value::String(request.name.clone()));
        identity.insert(
            "initiator".to_string(),
            Value::String(request.initiator.clone()),
        );
        identity.insert(
            "source_system".to_string(),
            Value::String(request.source_system.clone()),
        );
        identity.insert("context".to_string(), canonicalize(&request.context));
        identity.insert("reason".to_string(), Value::String(request.reason.clone()));
        identity.insert(
            "bypass_steps".to_string(),
            Value::Array(
                request
                    .bypass_steps
                    .iter()
                    .map(|s| Value::String(s.clone()))
                    .collect(),
            ),
        );
        identity.insert(
            "requested_at".to_string(),
            Value::String(request.requested_at.format("%Y-%m-%dT%H:%M").to_string()),
        );

        let encoded = Value::Object(identity).to_string();
        let digest = Sha256::digest(encoded.as_bytes());
        format!("{digest:x}")
    }

    /// Insert a task row for a validated request
    pub async fn create_from_request(
        pool: &PgPool,
        named_task_id: i64,
        request: &TaskRequest,
    ) -> Result<Self, sqlx::Error> {
        let identity_hash = Self::identity_hash_for(request);
        sqlx::query_as::<_, Task>(
            "INSERT INTO tasks \
             (named_task_id, complete, requested_at, initiator, source_system, reason, \
              context, tags, bypass_steps, identity_hash, correlation_id, created_at, updated_at) \
             VALUES ($1, FALSE, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW()) \
             RETURNING *",
        )
        .bind(named_task_id)
        .bind(request.requested_at)
        .bind(&request.initiator)
        .bind(&request.source_system)
        .bind(&request.reason)
        .bind(&request.context)
        .bind(&request.tags)
        .bind(&request.bypass_steps)
        .bind(&identity_hash)
        .bind(request.correlation_id)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, task_id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE task_id = $1")
            .bind(task_id)
            .fetch_optional(pool)
            .await
    }

    /// Find a task with the same identity hash created inside the
    /// duplicate-detection window.
    pub async fn find_duplicate_in_window(
        pool: &PgPool,
        identity_hash: &str,
        window_seconds: i64,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(
            "SELECT * FROM tasks \
             WHERE identity_hash = $1 \
               AND created_at >= NOW() - make_interval(secs => $2::double precision) \
             LIMIT 1",
        )
        .bind(identity_hash)
        .bind(window_seconds as f64)
        .fetch_optional(pool)
        .await
    }

    /// Flip the denormalized completion flag once the task reaches `complete`
    pub async fn mark_complete(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tasks SET complete = TRUE, updated_at = NOW() WHERE task_id = $1")
            .bind(self.task_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Failure details for every errored step of this task: step name,
    /// attempts, last failure time, and the last error message recorded in
    /// transition metadata.
    pub async fn failure_details(
        pool: &PgPool,
        task_id: i64,
    ) -> Result<Vec<StepFailureDetail>, sqlx::Error> {
        sqlx::query_as::<_, StepFailureDetail>(
            "WITH latest AS ( \
                 SELECT DISTINCT ON (workflow_step_id) \
                        workflow_step_id, to_state, metadata, created_at \
                 FROM workflow_step_transitions \
                 ORDER BY workflow_step_id, sort_key DESC \
             ) \
             SELECT ws.workflow_step_id, \
                    ns.name AS step_name, \
                    ws.attempts, \
                    ws.retry_limit, \
                    latest.created_at AS last_failure_at, \
                    latest.metadata->>'error' AS error_message \
             FROM workflow_steps ws \
             JOIN named_steps ns ON ns.named_step_id = ws.named_step_id \
             JOIN latest ON latest.workflow_step_id = ws.workflow_step_id \
             WHERE ws.task_id = $1 AND latest.to_state = 'error' \
             ORDER BY ws.sort_key, ws.workflow_step_id",
        )
        .bind(task_id)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use serde_json::json;

    fn request() -> TaskRequest {
        TaskRequest::new("process_order", "fulfillment")
            .with_version("1.0.0")
            .with_context(json!({"order_id": 42, "amount": 99.5}))
            .with_initiator("api_gateway")
            .with_source_system("storefront")
            .with_reason("checkout")
            .with_requested_at(
                chrono::NaiveDate::from_ymd_opt(2025, 6, 12)
                    .unwrap()
                    .and_hms_opt(10, 30, 45)
                    .unwrap(),
            )
    }

    #[test]
    fn test_identity_hash_is_hex_sha256() {
        let hash = Task::identity_hash_for(&request());
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_identity_hash_is_deterministic() {
        assert_eq!(
            Task::identity_hash_for(&request()),
            Task::identity_hash_for(&request())
        );
    }

    #[test]
    fn test_identity_hash_ignores_context_key_order() {
        let a = request().with_context(json!({"a": 1, "b": {"x": true, "y": false}}));
        let b = request().with_context(json!({"b": {"y": false, "x": true}, "a": 1}));
        assert_eq!(Task::identity_hash_for(&a), Task::identity_hash_for(&b));
    }

    #[test]
    fn test_identity_hash_truncates_requested_at_to_minute() {
        let base = chrono::NaiveDate::from_ymd_opt(2025, 6, 12)
            .unwrap()
            .and_hms_opt(10, 30, 5)
            .unwrap();
        let same_minute = base.with_second(59).map(|t| request().with_requested_at(t));
        let a = request().with_requested_at(base);
        let b = same_minute.unwrap();
        assert_eq!(Task::identity_hash_for(&a), Task::identity_hash_for(&b));

        let next_minute = request().with_requested_at(
            chrono::NaiveDate::from_ymd_opt(2025, 6, 12)
                .unwrap()
                .and_hms_opt(10, 31, 0)
                .unwrap(),
        );
        assert_ne!(
            Task::identity_hash_for(&a),
            Task::identity_hash_for(&next_minute)
        );
    }

    #[test]
    fn test_identity_hash_varies_by_context() {
        let a = request();
        let b = request().with_context(json!({"order_id": 43}));
        assert_ne!(Task::identity_hash_for(&a), Task::identity_hash_for(&b));
    }

    #[test]
    fn test_identity_hash_varies_by_bypass_steps() {
        let a = request();
        let b = request().with_bypass_steps(vec!["validate_inventory".to_string()]);
        assert_ne!(Task::identity_hash_for(&a), Task::identity_hash_for(&b));
    }

    #[test]
    fn test_serialized_task_round_trips_identity_hash() {
        let req = request();
        let hash = Task::identity_hash_for(&req);
        let round_tripped: TaskRequest =
            serde_json::from_str(&serde_json::to_string(&req).unwrap()).unwrap();
        assert_eq!(Task::identity_hash_for(&round_tripped), hash);
    }
}
