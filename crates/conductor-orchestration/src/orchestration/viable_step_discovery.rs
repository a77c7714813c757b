//! # Viable Step Discovery
//!
//! Thin façade over the readiness query engine: which steps may be
//! dispatched right now, in stable `(sort_key, step_id)` order, plus the
//! execution-context and workflow-summary views the coordinator and
//! finalizer consume.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use conductor_shared::errors::{OrchestrationError, OrchestrationResult};
use conductor_shared::models::core::WorkflowStep;
use conductor_shared::models::orchestration::workflow_summary::dependency_levels;
use conductor_shared::models::orchestration::{
    StepReadinessStatus, TaskExecutionContext, TaskWorkflowSummary,
};
use conductor_shared::system_context::SystemContext;

use super::handlers::StepSequence;

/// Step row plus its named step's name, for sequence construction
#[derive(Debug, sqlx::FromRow)]
struct StepWithName {
    name: String,
    #[sqlx(flatten)]
    step: WorkflowStep,
}

#[derive(Debug, Clone)]
pub struct ViableStepDiscovery {
    context: Arc<SystemContext>,
}

impl ViableStepDiscovery {
    pub fn new(context: Arc<SystemContext>) -> Self {
        Self { context }
    }

    /// Readiness rows for every step of the task
    pub async fn get_step_readiness(
        &self,
        task_id: i64,
    ) -> OrchestrationResult<Vec<StepReadinessStatus>> {
        self.context
            .sql_executor()
            .get_step_readiness_status(task_id, None)
            .await
            .map_err(|e| OrchestrationError::database("step_readiness", e))
    }

    /// Steps ready for execution, in dispatch order
    pub async fn find_viable_steps(
        &self,
        task_id: i64,
    ) -> OrchestrationResult<Vec<StepReadinessStatus>> {
        let readiness = self.get_step_readiness(task_id).await?;
        let viable: Vec<StepReadinessStatus> = readiness
            .into_iter()
            .filter(|row| row.ready_for_execution)
            .collect();

        debug!(
            task_id = task_id,
            viable_count = viable.len(),
            "Discovered viable steps"
        );
        Ok(viable)
    }

    pub async fn get_execution_context(
        &self,
        task_id: i64,
    ) -> OrchestrationResult<Option<TaskExecutionContext>> {
        self.context
            .sql_executor()
            .get_task_execution_context(task_id)
            .await
            .map_err(|e| OrchestrationError::database("execution_context", e))
    }

    pub async fn get_workflow_summary(
        &self,
        task_id: i64,
    ) -> OrchestrationResult<Option<TaskWorkflowSummary>> {
        self.context
            .sql_executor()
            .get_task_workflow_summary(task_id)
            .await
            .map_err(|e| OrchestrationError::database("workflow_summary", e))
    }

    /// Longest-path dependency depth per step id (roots at 0)
    pub async fn get_dependency_levels(
        &self,
        task_id: i64,
    ) -> OrchestrationResult<HashMap<i64, i32>> {
        let pool = self.context.database_pool();
        let steps = WorkflowStep::list_by_task(pool, task_id)
            .await
            .map_err(|e| OrchestrationError::database("list_steps", e))?;
        let edges: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT e.from_step_id, e.to_step_id \
             FROM workflow_step_edges e \
             JOIN workflow_steps ws ON ws.workflow_step_id = e.from_step_id \
             WHERE ws.task_id = $1",
        )
        .bind(task_id)
        .fetch_all(pool)
        .await
        .map_err(|e| OrchestrationError::database("list_edges", e))?;

        let step_ids: Vec<i64> = steps.iter().map(|s| s.workflow_step_id).collect();
        let mut parents: HashMap<i64, Vec<i64>> = HashMap::new();
        for (from, to) in edges {
            parents.entry(to).or_default().push(from);
        }
        Ok(dependency_levels(&step_ids, &parents))
    }

    /// The task's full step sequence (name -> step) in dispatch order,
    /// for handler input resolution.
    pub async fn get_step_sequence(&self, task_id: i64) -> OrchestrationResult<StepSequence> {
        let rows: Vec<StepWithName> = sqlx::query_as(
            "SELECT ns.name AS name, ws.* \
             FROM workflow_steps ws \
             JOIN named_steps ns ON ns.named_step_id = ws.named_step_id \
             WHERE ws.task_id = $1 \
             ORDER BY ws.sort_key, ws.workflow_step_id",
        )
        .bind(task_id)
        .fetch_all(self.context.database_pool())
        .await
        .map_err(|e| OrchestrationError::database("step_sequence", e))?;

        Ok(StepSequence::new(
            rows.into_iter().map(|row| (row.name, row.step)).collect(),
        ))
    }
}
