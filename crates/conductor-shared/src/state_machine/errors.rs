//! State machine errors

use thiserror::Error;

use crate::errors::ConductorError;

#[derive(Debug, Error)]
pub enum StateMachineError {
    #[error("invalid transition for {entity_kind} {entity_id}: {from_state:?} -> {to_state}")]
    InvalidTransition {
        entity_kind: &'static str,
        entity_id: i64,
        from_state: Option<String>,
        to_state: String,
    },

    #[error("{entity_kind} {entity_id} not found")]
    EntityNotFound {
        entity_kind: &'static str,
        entity_id: i64,
    },

    #[error("transition log for {entity_kind} {entity_id} holds unknown state {state}")]
    CorruptState {
        entity_kind: &'static str,
        entity_id: i64,
        state: String,
    },

    #[error("database error during {operation}: {source}")]
    Database {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl StateMachineError {
    pub fn database(operation: &'static str, source: sqlx::Error) -> Self {
        StateMachineError::Database { operation, source }
    }
}

impl From<StateMachineError> for ConductorError {
    fn from(err: StateMachineError) -> Self {
        match err {
            StateMachineError::InvalidTransition {
                entity_kind,
                entity_id,
                from_state,
                to_state,
            } => ConductorError::InvalidTransition {
                entity_kind,
                entity_id,
                from_state,
                to_state,
            },
            other => ConductorError::Database {
                operation: "state_transition".to_string(),
                reason: other.to_string(),
            },
        }
    }
}
