//! Task state machine.
//!
//! Serializes state changes for one task: the task row is locked for the
//! duration of the transition write, the latest transition is re-read under
//! that lock, the move is validated against the transition table, and the
//! new row is appended with the next sort key.

use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use tracing::debug;

use crate::models::core::task_transition::{NewTaskTransition, TaskTransition};

use super::errors::StateMachineError;
use super::events::TaskEvent;
use super::states::TaskState;

#[derive(Debug, Clone)]
pub struct TaskStateMachine {
    task_id: i64,
    pool: PgPool,
}

impl TaskStateMachine {
    pub fn for_task(task_id: i64, pool: PgPool) -> Self {
        Self { task_id, pool }
    }

    pub fn task_id(&self) -> i64 {
        self.task_id
    }

    /// Current state from the transition log; `pending` when the log is empty
    pub async fn current_state(&self) -> Result<TaskState, StateMachineError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StateMachineError::database("acquire", e))?;
        current_state_on(&mut conn, self.task_id).await
    }

    /// Apply an event, recording the transition. Returns the new state.
    pub async fn transition(&mut self, event: TaskEvent) -> Result<TaskState, StateMachineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StateMachineError::database("begin", e))?;

        let new_state = transition_in(&mut tx, self.task_id, &event, event.metadata()).await?;

        tx.commit()
            .await
            .map_err(|e| StateMachineError::database("commit", e))?;

        debug!(
            task_id = self.task_id,
            to_state = %new_state,
            "Task transition recorded"
        );
        Ok(new_state)
    }
}

/// Read the current task state on an existing connection
pub async fn current_state_on(
    conn: &mut PgConnection,
    task_id: i64,
) -> Result<TaskState, StateMachineError> {
    let label = TaskTransition::current_state_label(conn, task_id)
        .await
        .map_err(|e| StateMachineError::database("current_state", e))?;
    match label {
        None => Ok(TaskState::Pending),
        Some(label) => label
            .parse()
            .map_err(|_| StateMachineError::CorruptState {
                entity_kind: "task",
                entity_id: task_id,
                state: label,
            }),
    }
}

/// Validate and record a task transition inside the caller's transaction.
/// Locks the task row first so concurrent writers serialize.
pub async fn transition_in(
    conn: &mut PgConnection,
    task_id: i64,
    event: &TaskEvent,
    metadata: Option<Value>,
) -> Result<TaskState, StateMachineError> {
    let locked: Option<(i64,)> =
        sqlx::query_as("SELECT task_id FROM tasks WHERE task_id = $1 FOR UPDATE")
            .bind(task_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| StateMachineError::database("lock_task", e))?;
    if locked.is_none() {
        return Err(StateMachineError::EntityNotFound {
            entity_kind: "task",
            entity_id: task_id,
        });
    }

    let current_label = TaskTransition::current_state_label(&mut *conn, task_id)
        .await
        .map_err(|e| StateMachineError::database("current_state", e))?;
    let current = match &current_label {
        None => TaskState::Pending,
        Some(label) => label
            .parse()
            .map_err(|_| StateMachineError::CorruptState {
                entity_kind: "task",
                entity_id: task_id,
                state: label.clone(),
            })?,
    };

    let target = event.target_state();
    if !current.can_transition_to(target) {
        return Err(StateMachineError::InvalidTransition {
            entity_kind: "task",
            entity_id: task_id,
            from_state: current_label,
            to_state: target.to_string(),
        });
    }

    TaskTransition::create(
        conn,
        NewTaskTransition {
            task_id,
            from_state: current_label,
            to_state: target.to_string(),
            metadata,
        },
    )
    .await
    .map_err(|e| StateMachineError::database("insert_transition", e))?;

    Ok(target)
}
