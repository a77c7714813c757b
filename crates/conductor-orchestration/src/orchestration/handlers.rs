//! # Step Handler Contract
//!
//! A handler is the code the engine invokes to run one step. Handlers read
//! their inputs from the task context and previous steps' results (through
//! `StepSequence`), return a JSON result the engine stores on the step, and
//! signal failure through the typed error: retryable (scheduled for backoff,
//! bounded by the retry limit) or permanent (never retried).
//!
//! The engine guarantees at most one concurrent invocation per step, so
//! handlers need not be reentrant. It does not make the handler's business
//! operation idempotent.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use conductor_shared::models::core::{Task, WorkflowStep};

/// Server-supplied retry delay: seconds or an HTTP-date
#[derive(Debug, Clone, PartialEq)]
pub enum RetryAfter {
    Seconds(u32),
    HttpDate(String),
}

/// Typed failure signal from a handler
#[derive(Debug, Error)]
pub enum StepHandlerError {
    /// Transient condition (network, 5xx, 429); schedules backoff
    #[error("retryable step failure: {message}")]
    Retryable {
        message: String,
        /// Overrides the exponential backoff when present
        retry_after: Option<RetryAfter>,
    },

    /// Semantic error (validation, 4xx); the step is finished failing
    #[error("permanent step failure [{code}]: {message}")]
    Permanent { code: String, message: String },

    /// Anything a handler didn't classify; treated as retryable
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl StepHandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        StepHandlerError::Retryable {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn retryable_after(message: impl Into<String>, retry_after: RetryAfter) -> Self {
        StepHandlerError::Retryable {
            message: message.into(),
            retry_after: Some(retry_after),
        }
    }

    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        StepHandlerError::Permanent {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Unknown failures are conservatively retryable
    pub fn is_permanent(&self) -> bool {
        matches!(self, StepHandlerError::Permanent { .. })
    }
}

/// The steps of a task in dispatch order, resolvable by name. Handlers use
/// this to read previous steps' results.
#[derive(Debug, Clone)]
pub struct StepSequence {
    steps: Vec<(String, WorkflowStep)>,
}

impl StepSequence {
    pub fn new(steps: Vec<(String, WorkflowStep)>) -> Self {
        Self { steps }
    }

    pub fn find(&self, name: &str) -> Option<&WorkflowStep> {
        self.steps
            .iter()
            .find(|(step_name, _)| step_name == name)
            .map(|(_, step)| step)
    }

    /// Results of a named previous step, if it has any
    pub fn results_for(&self, name: &str) -> Option<&Value> {
        self.find(name).and_then(|step| step.results.as_ref())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, WorkflowStep)> {
        self.steps.iter()
    }
}

/// The invocation contract for step business logic
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn handle(
        &self,
        task: &Task,
        sequence: &StepSequence,
        step: &WorkflowStep,
    ) -> Result<Value, StepHandlerError>;
}

/// Maps `handler_class` identifiers to handler instances
#[derive(Default)]
pub struct StepHandlerRegistry {
    handlers: DashMap<String, Arc<dyn StepHandler>>,
}

impl std::fmt::Debug for StepHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepHandlerRegistry")
            .field("handler_count", &self.handlers.len())
            .finish()
    }
}

impl StepHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler_class: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(handler_class.into(), handler);
    }

    pub fn resolve(&self, handler_class: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers
            .get(handler_class)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, handler_class: &str) -> bool {
        self.handlers.contains_key(handler_class)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl StepHandler for EchoHandler {
        async fn handle(
            &self,
            task: &Task,
            _sequence: &StepSequence,
            _step: &WorkflowStep,
        ) -> Result<Value, StepHandlerError> {
            Ok(json!({ "echo": &task.context }))
        }
    }

    #[test]
    fn test_registry_resolution() {
        let registry = StepHandlerRegistry::new();
        registry.register("handlers.echo", Arc::new(EchoHandler));

        assert!(registry.contains("handlers.echo"));
        assert!(registry.resolve("handlers.echo").is_some());
        assert!(registry.resolve("handlers.missing").is_none());
        assert_eq!(registry.handler_count(), 1);
    }

    #[test]
    fn test_unknown_errors_are_retryable() {
        let unknown: StepHandlerError = anyhow::anyhow!("wire tripped").into();
        assert!(!unknown.is_permanent());

        let permanent = StepHandlerError::permanent("422", "bad payload");
        assert!(permanent.is_permanent());

        let retryable = StepHandlerError::retryable("503 from upstream");
        assert!(!retryable.is_permanent());
    }

    #[test]
    fn test_retry_after_is_carried() {
        let error = StepHandlerError::retryable_after("429", RetryAfter::Seconds(7));
        match error {
            StepHandlerError::Retryable { retry_after, .. } => {
                assert_eq!(retry_after, Some(RetryAfter::Seconds(7)));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    fn step(name_suffix: i64, results: Option<Value>) -> WorkflowStep {
        WorkflowStep {
            workflow_step_id: name_suffix,
            task_id: 1,
            named_step_id: name_suffix,
            sort_key: name_suffix as i32,
            retry_limit: 3,
            retryable: true,
            skippable: false,
            attempts: 0,
            in_process: false,
            processed: results.is_some(),
            processed_at: None,
            last_attempted_at: None,
            backoff_request_seconds: None,
            inputs: None,
            results,
            created_at: chrono::Utc::now().naive_utc(),
            updated_at: chrono::Utc::now().naive_utc(),
        }
    }

    #[test]
    fn test_sequence_find_and_results() {
        let sequence = StepSequence::new(vec![
            ("fetch".to_string(), step(1, Some(json!({"rows": 3})))),
            ("transform".to_string(), step(2, None)),
        ]);

        assert!(sequence.find("fetch").is_some());
        assert!(sequence.find("load").is_none());
        assert_eq!(sequence.results_for("fetch").unwrap()["rows"], 3);
        assert!(sequence.results_for("transform").is_none());
        assert_eq!(sequence.len(), 2);
    }
}
