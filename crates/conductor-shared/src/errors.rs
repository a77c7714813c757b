//! # Error Taxonomy
//!
//! Layered error types for the conductor system. `ConductorError` is the
//! top-level type surfaced to callers; `OrchestrationError` covers failures
//! inside the orchestration loop and converts into `ConductorError` at the
//! boundary.

use thiserror::Error;

/// Result alias for top-level operations
pub type ConductorResult<T> = Result<T, ConductorError>;

/// Result alias for orchestration-internal operations
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

/// Top-level errors surfaced to callers of the conductor system
#[derive(Debug, Error)]
pub enum ConductorError {
    /// A task request's identity hash matched a live task inside the
    /// duplicate-detection window
    #[error("duplicate task request: identity hash {identity_hash} seen within the last {window_seconds}s")]
    DuplicateTask {
        identity_hash: String,
        window_seconds: i64,
    },

    /// The request named a task template that is not registered
    #[error("unknown task: {namespace}/{name}/{version}")]
    UnknownTask {
        namespace: String,
        name: String,
        version: String,
    },

    /// A state change was rejected by the transition table
    #[error("invalid transition for {entity_kind} {entity_id}: {from_state:?} -> {to_state}")]
    InvalidTransition {
        entity_kind: &'static str,
        entity_id: i64,
        from_state: Option<String>,
        to_state: String,
    },

    /// A step consumed its full retry budget
    #[error("retries exhausted for step {step_id} after {attempts} attempts (limit {retry_limit})")]
    RetryExhausted {
        step_id: i64,
        attempts: i32,
        retry_limit: i32,
    },

    /// The task cannot make progress: failed steps with no retry path
    #[error("task {task_id} is blocked by failures: {reason}")]
    TaskBlocked { task_id: i64, reason: String },

    /// A step or batch exceeded its execution budget
    #[error("timeout after {elapsed_ms}ms: {context}")]
    Timeout { elapsed_ms: u64, context: String },

    /// Workflow definition rejected before execution (cyclic DAG, missing
    /// handler, dangling dependency)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Request payload failed validation at ingress
    #[error("validation error: {0}")]
    Validation(String),

    #[error("database error during {operation}: {reason}")]
    Database { operation: String, reason: String },

    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),
}

/// Errors arising inside the orchestration loop
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("database error during {operation}: {reason}")]
    DatabaseError { operation: String, reason: String },

    #[error("state transition failed for {entity_kind} {entity_id}: {reason}")]
    StateTransitionFailed {
        entity_kind: &'static str,
        entity_id: i64,
        reason: String,
    },

    #[error("task {task_id} not found")]
    TaskNotFound { task_id: i64 },

    #[error("step {step_id} not found")]
    StepNotFound { step_id: i64 },

    #[error("no handler registered for class {handler_class}")]
    HandlerNotFound { handler_class: String },

    #[error("finalization failed for task {task_id}: {reason}")]
    FinalizationFailed { task_id: i64, reason: String },

    #[error("reenqueue failed for task {task_id}: {reason}")]
    ReenqueueFailed { task_id: i64, reason: String },

    #[error("backoff calculation failed for step {step_id}: {reason}")]
    BackoffFailed { step_id: i64, reason: String },

    #[error("orchestration error: {0}")]
    General(String),
}

impl From<sqlx::Error> for OrchestrationError {
    fn from(err: sqlx::Error) -> Self {
        OrchestrationError::DatabaseError {
            operation: "query".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for ConductorError {
    fn from(err: sqlx::Error) -> Self {
        ConductorError::Database {
            operation: "query".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<String> for OrchestrationError {
    fn from(message: String) -> Self {
        OrchestrationError::General(message)
    }
}

impl OrchestrationError {
    /// Wrap a database error with the operation that produced it
    pub fn database(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        OrchestrationError::DatabaseError {
            operation: operation.into(),
            reason: err.to_string(),
        }
    }
}
