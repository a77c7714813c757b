//! Step state machine.
//!
//! Same shape as the task state machine, plus transaction-composable entry
//! points the executor uses to bundle the retry transition, the claim
//! transition, and the step bookkeeping into one atomic write.

use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use tracing::debug;

use crate::models::core::workflow_step_transition::{
    NewWorkflowStepTransition, WorkflowStepTransition,
};

use super::errors::StateMachineError;
use super::events::StepEvent;
use super::states::WorkflowStepState;

#[derive(Debug, Clone)]
pub struct StepStateMachine {
    workflow_step_id: i64,
    pool: PgPool,
}

impl StepStateMachine {
    pub fn for_step(workflow_step_id: i64, pool: PgPool) -> Self {
        Self {
            workflow_step_id,
            pool,
        }
    }

    pub fn workflow_step_id(&self) -> i64 {
        self.workflow_step_id
    }

    pub async fn current_state(&self) -> Result<WorkflowStepState, StateMachineError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StateMachineError::database("acquire", e))?;
        current_state_on(&mut conn, self.workflow_step_id).await
    }

    /// Apply an event in its own transaction
    pub async fn transition(
        &mut self,
        event: StepEvent,
    ) -> Result<WorkflowStepState, StateMachineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StateMachineError::database("begin", e))?;

        let metadata = event.metadata();
        let new_state = transition_in(&mut tx, self.workflow_step_id, &event, metadata).await?;

        tx.commit()
            .await
            .map_err(|e| StateMachineError::database("commit", e))?;

        debug!(
            workflow_step_id = self.workflow_step_id,
            to_state = %new_state,
            "Step transition recorded"
        );
        Ok(new_state)
    }
}

/// Read the current step state on an existing connection
pub async fn current_state_on(
    conn: &mut PgConnection,
    workflow_step_id: i64,
) -> Result<WorkflowStepState, StateMachineError> {
    let label = WorkflowStepTransition::current_state_label(conn, workflow_step_id)
        .await
        .map_err(|e| StateMachineError::database("current_state", e))?;
    match label {
        None => Ok(WorkflowStepState::Pending),
        Some(label) => label
            .parse()
            .map_err(|_| StateMachineError::CorruptState {
                entity_kind: "workflow_step",
                entity_id: workflow_step_id,
                state: label,
            }),
    }
}

/// Validate and record a step transition inside the caller's transaction.
/// Locks the step row so only one transition lands at a time.
pub async fn transition_in(
    conn: &mut PgConnection,
    workflow_step_id: i64,
    event: &StepEvent,
    metadata: Option<Value>,
) -> Result<WorkflowStepState, StateMachineError> {
    let locked: Option<(i64,)> = sqlx::query_as(
        "SELECT workflow_step_id FROM workflow_steps WHERE workflow_step_id = $1 FOR UPDATE",
    )
    .bind(workflow_step_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| StateMachineError::database("lock_step", e))?;
    if locked.is_none() {
        return Err(StateMachineError::EntityNotFound {
            entity_kind: "workflow_step",
            entity_id: workflow_step_id,
        });
    }

    let current_label = WorkflowStepTransition::current_state_label(&mut *conn, workflow_step_id)
        .await
        .map_err(|e| StateMachineError::database("current_state", e))?;
    let current = match &current_label {
        None => WorkflowStepState::Pending,
        Some(label) => label
            .parse()
            .map_err(|_| StateMachineError::CorruptState {
                entity_kind: "workflow_step",
                entity_id: workflow_step_id,
                state: label.clone(),
            })?,
    };

    let target = event.target_state();
    if !current.can_transition_to(target) {
        return Err(StateMachineError::InvalidTransition {
            entity_kind: "workflow_step",
            entity_id: workflow_step_id,
            from_state: current_label,
            to_state: target.to_string(),
        });
    }

    WorkflowStepTransition::create(
        conn,
        NewWorkflowStepTransition {
            workflow_step_id,
            from_state: current_label,
            to_state: target.to_string(),
            metadata,
        },
    )
    .await
    .map_err(|e| StateMachineError::database("insert_transition", e))?;

    Ok(target)
}
