//! # Readiness Query Engine
//!
//! Single source of truth for "is step X ready to execute right now" and
//! "what is the aggregate state of task T". The readiness computation is one
//! inlined CTE query over steps, their latest transitions, and the edge
//! list, so the orchestrator never walks the graph row by row.
//!
//! Query failures propagate; there is no silent degradation. All time
//! comparisons use the database clock.

use sqlx::PgPool;
use tracing::debug;

use crate::models::core::Task;
use crate::models::orchestration::{
    ExecutionContextCounts, StepReadinessStatus, TaskExecutionContext, TaskWorkflowSummary,
};

/// A step is ready iff all of:
///  1. current state is pending or error, and not processed;
///  2. not flagged in-process;
///  3. every parent is complete (or bypassed and skippable);
///  4. first attempt, or attempt budget remaining;
///  5. retryable;
///  6. any backoff window has expired (explicit request first, exponential
///     fallback over the last failure otherwise).
///
/// The exponential fallback caps at 30s; the backoff calculator writes an
/// explicit `backoff_request_seconds` for every recorded failure, so the
/// fallback only drives when that write was lost.
const STEP_READINESS_SQL: &str = "\
WITH task_info AS ( \
    SELECT task_id, bypass_steps FROM tasks WHERE task_id = $1 \
), \
steps AS ( \
    SELECT ws.*, ns.name AS step_name \
    FROM workflow_steps ws \
    JOIN named_steps ns ON ns.named_step_id = ws.named_step_id \
    WHERE ws.task_id = $1 \
      AND ($2::bigint[] IS NULL OR ws.workflow_step_id = ANY($2)) \
), \
step_states AS ( \
    SELECT DISTINCT ON (wst.workflow_step_id) \
           wst.workflow_step_id, wst.to_state \
    FROM workflow_step_transitions wst \
    JOIN workflow_steps ws ON ws.workflow_step_id = wst.workflow_step_id \
    WHERE ws.task_id = $1 \
    ORDER BY wst.workflow_step_id, wst.sort_key DESC \
), \
last_failures AS ( \
    SELECT DISTINCT ON (wst.workflow_step_id) \
           wst.workflow_step_id, wst.created_at \
    FROM workflow_step_transitions wst \
    JOIN workflow_steps ws ON ws.workflow_step_id = wst.workflow_step_id \
    WHERE ws.task_id = $1 AND wst.to_state = 'error' \
    ORDER BY wst.workflow_step_id, wst.sort_key DESC \
), \
parent_info AS ( \
    SELECT e.to_step_id AS workflow_step_id, \
           COUNT(*) AS total_parents, \
           COUNT(*) FILTER ( \
               WHERE COALESCE(ps.to_state, 'pending') = 'complete' \
           ) AS completed_parents, \
           COUNT(*) FILTER ( \
               WHERE COALESCE(ps.to_state, 'pending') = 'complete' \
                  OR (pws.skippable AND pns.name = ANY(t.bypass_steps)) \
           ) AS satisfied_parents \
    FROM workflow_step_edges e \
    JOIN workflow_steps pws ON pws.workflow_step_id = e.from_step_id \
    JOIN named_steps pns ON pns.named_step_id = pws.named_step_id \
    LEFT JOIN step_states ps ON ps.workflow_step_id = e.from_step_id \
    CROSS JOIN task_info t \
    WHERE pws.task_id = $1 \
    GROUP BY e.to_step_id \
) \
SELECT \
    s.workflow_step_id, \
    s.task_id, \
    s.named_step_id, \
    s.step_name AS name, \
    s.sort_key, \
    COALESCE(cs.to_state, 'pending') AS current_state, \
    COALESCE(pi.total_parents, 0) = COALESCE(pi.satisfied_parents, 0) AS dependencies_satisfied, \
    COALESCE(pi.total_parents, 0) AS total_parents, \
    COALESCE(pi.completed_parents, 0) AS completed_parents, \
    s.attempts, \
    s.retry_limit, \
    s.retryable, \
    (s.attempts = 0 OR s.attempts < s.retry_limit) AS retry_eligible, \
    CASE \
        WHEN s.backoff_request_seconds IS NOT NULL AND s.last_attempted_at IS NOT NULL \
            THEN s.last_attempted_at + make_interval(secs => s.backoff_request_seconds::double precision) \
        WHEN s.attempts > 0 AND lf.created_at IS NOT NULL \
            THEN lf.created_at + make_interval(secs => LEAST(power(2, LEAST(s.attempts, 16)), 30)) \
        ELSE NULL \
    END AS next_retry_at, \
    lf.created_at AS last_failure_at, \
    s.backoff_request_seconds, \
    s.last_attempted_at, \
    s.in_process, \
    s.processed, \
    ( \
        COALESCE(cs.to_state, 'pending') IN ('pending', 'error') \
        AND s.processed = FALSE \
        AND s.in_process = FALSE \
        AND COALESCE(pi.total_parents, 0) = COALESCE(pi.satisfied_parents, 0) \
        AND (s.attempts = 0 OR s.attempts < s.retry_limit) \
        AND COALESCE(s.retryable, TRUE) = TRUE \
        AND CASE \
            WHEN s.backoff_request_seconds IS NOT NULL AND s.last_attempted_at IS NOT NULL \
                THEN NOW() >= s.last_attempted_at + make_interval(secs => s.backoff_request_seconds::double precision) \
            WHEN s.attempts > 0 AND lf.created_at IS NOT NULL \
                THEN NOW() >= lf.created_at + make_interval(secs => LEAST(power(2, LEAST(s.attempts, 16)), 30)) \
            ELSE TRUE \
        END \
    ) AS ready_for_execution \
FROM steps s \
LEFT JOIN step_states cs ON cs.workflow_step_id = s.workflow_step_id \
LEFT JOIN last_failures lf ON lf.workflow_step_id = s.workflow_step_id \
LEFT JOIN parent_info pi ON pi.workflow_step_id = s.workflow_step_id \
ORDER BY s.sort_key, s.workflow_step_id";

/// Gauges feeding the dynamic concurrency calculation
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct SystemHealthCounts {
    pub in_progress_tasks: i64,
    pub in_progress_steps: i64,
    pub pending_steps: i64,
}

/// Executes the readiness and aggregation queries.
///
/// Rows are consistent with the transition log under read-your-own-writes
/// within one connection; cross-connection readers may briefly lag.
#[derive(Debug, Clone)]
pub struct SqlFunctionExecutor {
    pool: PgPool,
}

impl SqlFunctionExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Readiness rows for a task; `step_ids` narrows the output but parent
    /// satisfaction always considers the whole task.
    pub async fn get_step_readiness_status(
        &self,
        task_id: i64,
        step_ids: Option<Vec<i64>>,
    ) -> Result<Vec<StepReadinessStatus>, sqlx::Error> {
        let rows = sqlx::query_as::<_, StepReadinessStatus>(STEP_READINESS_SQL)
            .bind(task_id)
            .bind(step_ids)
            .fetch_all(&self.pool)
            .await?;

        debug!(
            task_id = task_id,
            step_count = rows.len(),
            ready_count = rows.iter().filter(|r| r.ready_for_execution).count(),
            "Computed step readiness"
        );
        Ok(rows)
    }

    /// Aggregated execution context for a task; None if the task is unknown
    pub async fn get_task_execution_context(
        &self,
        task_id: i64,
    ) -> Result<Option<TaskExecutionContext>, sqlx::Error> {
        let Some(task) = Task::find_by_id(&self.pool, task_id).await? else {
            return Ok(None);
        };

        let aggregate_sql = format!(
            "SELECT \
                 COUNT(*) AS total_steps, \
                 COUNT(*) FILTER (WHERE r.current_state = 'pending') AS pending_steps, \
                 COUNT(*) FILTER (WHERE r.current_state = 'in_progress') AS in_progress_steps, \
                 COUNT(*) FILTER (WHERE r.current_state = 'complete') AS completed_steps, \
                 COUNT(*) FILTER (WHERE r.current_state = 'error') AS failed_steps, \
                 COUNT(*) FILTER (WHERE r.ready_for_execution) AS ready_steps, \
                 COUNT(*) FILTER ( \
                     WHERE r.current_state = 'error' \
                       AND (NOT r.retry_eligible OR NOT r.retryable) \
                 ) AS exhausted_failures, \
                 MIN(r.next_retry_at) FILTER ( \
                     WHERE r.current_state = 'error' \
                       AND r.retry_eligible AND r.retryable \
                 ) AS min_next_retry_at \
             FROM ({STEP_READINESS_SQL}) r"
        );

        let counts = sqlx::query_as::<_, ExecutionContextCounts>(&aggregate_sql)
            .bind(task_id)
            .bind(Option::<Vec<i64>>::None)
            .fetch_one(&self.pool)
            .await?;

        Ok(Some(TaskExecutionContext::from_counts(
            task.task_id,
            task.named_task_id,
            &counts,
        )))
    }

    /// Workflow summary: graph shape plus blocked/next-executable views
    pub async fn get_task_workflow_summary(
        &self,
        task_id: i64,
    ) -> Result<Option<TaskWorkflowSummary>, sqlx::Error> {
        let readiness = self.get_step_readiness_status(task_id, None).await?;
        if readiness.is_empty() {
            return Ok(None);
        }

        let edges: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT e.from_step_id, e.to_step_id \
             FROM workflow_step_edges e \
             JOIN workflow_steps ws ON ws.workflow_step_id = e.from_step_id \
             WHERE ws.task_id = $1",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(TaskWorkflowSummary::build(task_id, &readiness, &edges)))
    }

    /// System-wide gauges for the concurrency governor
    pub async fn get_system_health_counts(&self) -> Result<SystemHealthCounts, sqlx::Error> {
        sqlx::query_as::<_, SystemHealthCounts>(
            "SELECT \
                 (SELECT COUNT(*) FROM ( \
                      SELECT DISTINCT ON (task_id) to_state \
                      FROM task_transitions ORDER BY task_id, sort_key DESC \
                  ) latest WHERE latest.to_state = 'in_progress') AS in_progress_tasks, \
                 (SELECT COUNT(*) FROM workflow_steps WHERE in_process = TRUE) AS in_progress_steps, \
                 (SELECT COUNT(*) FROM workflow_steps WHERE processed = FALSE) AS pending_steps",
        )
        .fetch_one(&self.pool)
        .await
    }
}
