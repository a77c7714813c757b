//! # Step Executor
//!
//! Dispatches a batch of viable steps to their handlers with bounded
//! concurrency, records outcomes, and moves step state.
//!
//! Per step: a claim transaction (retry transition when re-arming a failed
//! step, the `in_progress` transition, the attempt increment, and the
//! `in_process` flag), then the handler invocation outside any transaction,
//! then an outcome transaction (result or error transition, backoff,
//! `processed`, `in_process` cleared). Handler I/O never pins a database
//! transaction.
//!
//! The whole batch shares one deadline: `min(max, base + 5s * batch_size)`.
//! Futures still running at the deadline are cancelled and recorded as
//! retryable failures with the `timeout` code.

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use conductor_shared::errors::{ConductorError, OrchestrationError, OrchestrationResult};
use conductor_shared::events::{names, OrchestrationEvent};
use conductor_shared::models::core::{Task, WorkflowStep};
use conductor_shared::models::orchestration::StepReadinessStatus;
use conductor_shared::registry::TaskTemplateRegistry;
use conductor_shared::state_machine::errors::StateMachineError;
use conductor_shared::state_machine::step_state_machine;
use conductor_shared::state_machine::StepEvent;
use conductor_shared::system_context::SystemContext;

use super::backoff_calculator::{BackoffCalculator, BackoffResult};
use super::handlers::{StepHandlerError, StepHandlerRegistry, StepSequence};
use super::system_health::ConcurrencyGovernor;

/// What happened to one dispatched step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed,
    Failed { permanent: bool },
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub workflow_step_id: i64,
    pub step_name: String,
    pub attempt: i32,
    pub outcome: StepOutcome,
    pub error_message: Option<String>,
    pub backoff_seconds: Option<u32>,
}

impl StepResult {
    pub fn succeeded(&self) -> bool {
        self.outcome == StepOutcome::Completed
    }
}

pub struct StepExecutor {
    context: Arc<SystemContext>,
    handler_registry: Arc<StepHandlerRegistry>,
    template_registry: Arc<TaskTemplateRegistry>,
    backoff_calculator: BackoffCalculator,
    governor: Arc<ConcurrencyGovernor>,
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("handler_count", &self.handler_registry.handler_count())
            .finish()
    }
}

impl StepExecutor {
    pub fn new(
        context: Arc<SystemContext>,
        handler_registry: Arc<StepHandlerRegistry>,
        template_registry: Arc<TaskTemplateRegistry>,
    ) -> Self {
        let config = context.config();
        let backoff_calculator = BackoffCalculator::new(config.backoff.clone());
        let governor = Arc::new(ConcurrencyGovernor::new(
            context.database_pool().clone(),
            config.execution.clone(),
            config.database.max_connections,
        ));
        Self {
            context,
            handler_registry,
            template_registry,
            backoff_calculator,
            governor,
        }
    }

    /// Execute a batch of viable steps. Dispatch order is the caller's
    /// (stable readiness order); completion order is unspecified.
    pub async fn execute(
        &self,
        task: &Task,
        sequence: &StepSequence,
        viable: &[StepReadinessStatus],
    ) -> OrchestrationResult<Vec<StepResult>> {
        if viable.is_empty() {
            return Ok(Vec::new());
        }

        let cap = self.governor.current_cap().await;
        let timeout_seconds = self
            .context
            .config()
            .execution
            .batch_timeout_seconds(viable.len());
        let deadline = Instant::now() + std::time::Duration::from_secs(timeout_seconds);

        debug!(
            task_id = task.task_id,
            batch_size = viable.len(),
            concurrency_cap = cap,
            timeout_seconds = timeout_seconds,
            "Executing step batch"
        );

        let outcomes: Vec<OrchestrationResult<Option<StepResult>>> = stream::iter(viable)
            .map(|row| self.execute_single(task, sequence, row, deadline, timeout_seconds))
            .buffer_unordered(cap)
            .collect()
            .await;

        let mut results = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            if let Some(result) = outcome? {
                results.push(result);
            }
        }

        info!(
            task_id = task.task_id,
            dispatched = results.len(),
            completed = results.iter().filter(|r| r.succeeded()).count(),
            "Step batch finished"
        );
        Ok(results)
    }

    /// Claim, invoke, record. Returns None when the claim lost a race and
    /// the step was already taken elsewhere.
    async fn execute_single(
        &self,
        task: &Task,
        sequence: &StepSequence,
        readiness: &StepReadinessStatus,
        deadline: Instant,
        timeout_seconds: u64,
    ) -> OrchestrationResult<Option<StepResult>> {
        let step_id = readiness.workflow_step_id;
        let Some(step) = WorkflowStep::find_by_id(self.context.database_pool(), step_id)
            .await
            .map_err(|e| OrchestrationError::database("load_step", e))?
        else {
            return Err(OrchestrationError::StepNotFound { step_id });
        };

        let attempt_number = step.attempts + 1;
        let was_error = readiness.current_state == "error";
        if !self.claim_step(&step, attempt_number, was_error).await? {
            debug!(
                task_id = task.task_id,
                workflow_step_id = step_id,
                "Step already claimed elsewhere; skipping"
            );
            return Ok(None);
        }

        let publisher = self.context.event_publisher();
        publisher.publish(
            OrchestrationEvent::for_step(
                names::STEP_BEFORE_HANDLE,
                task.task_id,
                step_id,
                task.correlation_id,
            )
            .with_metadata(json!({
                "step_name": &readiness.name,
                "attempt": attempt_number,
            })),
        );

        let handler = self.resolve_handler(task, &readiness.name).await?;
        let invocation =
            tokio::time::timeout_at(deadline, handler.handle(task, sequence, &step)).await;

        let result = match invocation {
            Ok(Ok(value)) => {
                self.record_success(task, &step, &readiness.name, attempt_number, value)
                    .await?
            }
            Ok(Err(handler_error)) => {
                self.record_failure(task, &step, &readiness.name, attempt_number, handler_error)
                    .await?
            }
            Err(_elapsed) => {
                self.record_timeout(task, &step, &readiness.name, attempt_number, timeout_seconds)
                    .await?
            }
        };

        Ok(Some(result))
    }

    /// Claim transaction: retry transition (when re-arming a failed step),
    /// `in_progress` transition, attempt increment, `in_process` flag.
    /// Returns false when the step's state no longer admits a claim.
    async fn claim_step(
        &self,
        step: &WorkflowStep,
        attempt_number: i32,
        was_error: bool,
    ) -> OrchestrationResult<bool> {
        let mut tx = self
            .context
            .database_pool()
            .begin()
            .await
            .map_err(|e| OrchestrationError::database("begin_claim", e))?;

        if was_error {
            let retry = StepEvent::Retry { attempt_number };
            let metadata = retry.metadata();
            match step_state_machine::transition_in(&mut tx, step.workflow_step_id, &retry, metadata)
                .await
            {
                Ok(_) => {}
                Err(StateMachineError::InvalidTransition { .. }) => return Ok(false),
                Err(e) => {
                    return Err(OrchestrationError::StateTransitionFailed {
                        entity_kind: "workflow_step",
                        entity_id: step.workflow_step_id,
                        reason: e.to_string(),
                    })
                }
            }
        }

        let start = StepEvent::Start { attempt_number };
        let metadata = start.metadata();
        match step_state_machine::transition_in(&mut tx, step.workflow_step_id, &start, metadata)
            .await
        {
            Ok(_) => {}
            Err(StateMachineError::InvalidTransition { .. }) => return Ok(false),
            Err(e) => {
                return Err(OrchestrationError::StateTransitionFailed {
                    entity_kind: "workflow_step",
                    entity_id: step.workflow_step_id,
                    reason: e.to_string(),
                })
            }
        }

        step.record_claim(&mut tx)
            .await
            .map_err(|e| OrchestrationError::database("record_claim", e))?;

        tx.commit()
            .await
            .map_err(|e| OrchestrationError::database("commit_claim", e))?;
        Ok(true)
    }

    async fn resolve_handler(
        &self,
        task: &Task,
        step_name: &str,
    ) -> OrchestrationResult<Arc<dyn super::handlers::StepHandler>> {
        let qualified = conductor_shared::models::core::NamedTask::qualified_name_for_task(
            self.context.database_pool(),
            task.task_id,
        )
        .await
        .map_err(|e| OrchestrationError::database("qualified_name", e))?
        .ok_or(OrchestrationError::TaskNotFound {
            task_id: task.task_id,
        })?;

        let template = self
            .template_registry
            .get_task_template(&qualified.0, &qualified.1, &qualified.2)
            .map_err(|e| OrchestrationError::General(e.to_string()))?;

        let handler_class = template
            .steps
            .iter()
            .find(|s| s.name == step_name)
            .map(|s| s.handler_class.clone())
            .ok_or_else(|| {
                OrchestrationError::General(format!(
                    "step '{step_name}' missing from template {}/{}/{}",
                    qualified.0, qualified.1, qualified.2
                ))
            })?;

        self.handler_registry
            .resolve(&handler_class)
            .ok_or(OrchestrationError::HandlerNotFound { handler_class })
    }

    /// Outcome transaction for success: complete transition, stored results,
    /// `processed` flag, `in_process` cleared.
    async fn record_success(
        &self,
        task: &Task,
        step: &WorkflowStep,
        step_name: &str,
        attempt_number: i32,
        results: Value,
    ) -> OrchestrationResult<StepResult> {
        let mut tx = self
            .context
            .database_pool()
            .begin()
            .await
            .map_err(|e| OrchestrationError::database("begin_outcome", e))?;

        let event = StepEvent::Complete(Some(results.clone()));
        let metadata = event.metadata();
        step_state_machine::transition_in(&mut tx, step.workflow_step_id, &event, metadata)
            .await
            .map_err(|e| OrchestrationError::StateTransitionFailed {
                entity_kind: "workflow_step",
                entity_id: step.workflow_step_id,
                reason: e.to_string(),
            })?;
        step.record_success(&mut tx, Some(&results))
            .await
            .map_err(|e| OrchestrationError::database("record_success", e))?;
        tx.commit()
            .await
            .map_err(|e| OrchestrationError::database("commit_outcome", e))?;

        self.context.event_publisher().publish(
            OrchestrationEvent::for_step(
                names::STEP_COMPLETED,
                task.task_id,
                step.workflow_step_id,
                task.correlation_id,
            )
            .with_metadata(json!({
                "step_name": step_name,
                "attempt": attempt_number,
            })),
        );

        Ok(StepResult {
            workflow_step_id: step.workflow_step_id,
            step_name: step_name.to_string(),
            attempt: attempt_number,
            outcome: StepOutcome::Completed,
            error_message: None,
            backoff_seconds: None,
        })
    }

    /// Outcome transaction for a handler failure. Permanent failures flip
    /// `retryable` off; retryable ones store the computed backoff.
    async fn record_failure(
        &self,
        task: &Task,
        step: &WorkflowStep,
        step_name: &str,
        attempt_number: i32,
        handler_error: StepHandlerError,
    ) -> OrchestrationResult<StepResult> {
        let permanent = handler_error.is_permanent();
        let message = handler_error.to_string();
        let retry_after = match &handler_error {
            StepHandlerError::Retryable { retry_after, .. } => retry_after.clone(),
            _ => None,
        };
        let backoff = if permanent {
            None
        } else {
            Some(
                self.backoff_calculator
                    .backoff_for(attempt_number as u32, retry_after.as_ref()),
            )
        };

        self.record_error_outcome(step, &message, permanent, backoff.as_ref())
            .await?;
        self.publish_failure(task, step, step_name, attempt_number, &message, backoff.as_ref());

        if permanent {
            warn!(
                task_id = task.task_id,
                workflow_step_id = step.workflow_step_id,
                step_name = step_name,
                error = %message,
                "Step failed permanently"
            );
        }

        Ok(StepResult {
            workflow_step_id: step.workflow_step_id,
            step_name: step_name.to_string(),
            attempt: attempt_number,
            outcome: StepOutcome::Failed { permanent },
            error_message: Some(message),
            backoff_seconds: backoff.map(|b| b.delay_seconds),
        })
    }

    /// Timed-out handlers are cancelled and the step recorded as a
    /// retryable failure with the `timeout` code.
    async fn record_timeout(
        &self,
        task: &Task,
        step: &WorkflowStep,
        step_name: &str,
        attempt_number: i32,
        timeout_seconds: u64,
    ) -> OrchestrationResult<StepResult> {
        let message = ConductorError::Timeout {
            elapsed_ms: timeout_seconds * 1000,
            context: format!("step '{step_name}' exceeded the batch deadline"),
        }
        .to_string();
        let backoff = self
            .backoff_calculator
            .backoff_for(attempt_number as u32, None);

        self.record_error_outcome(step, &message, false, Some(&backoff))
            .await?;

        self.context.event_publisher().publish(
            OrchestrationEvent::for_step(
                names::STEP_TIMEOUT,
                task.task_id,
                step.workflow_step_id,
                task.correlation_id,
            )
            .with_metadata(json!({
                "step_name": step_name,
                "attempt": attempt_number,
                "error_code": "timeout",
            })),
        );
        self.publish_failure(task, step, step_name, attempt_number, &message, Some(&backoff));

        Ok(StepResult {
            workflow_step_id: step.workflow_step_id,
            step_name: step_name.to_string(),
            attempt: attempt_number,
            outcome: StepOutcome::TimedOut,
            error_message: Some(message),
            backoff_seconds: Some(backoff.delay_seconds),
        })
    }

    async fn record_error_outcome(
        &self,
        step: &WorkflowStep,
        message: &str,
        permanent: bool,
        backoff: Option<&BackoffResult>,
    ) -> OrchestrationResult<()> {
        let mut tx = self
            .context
            .database_pool()
            .begin()
            .await
            .map_err(|e| OrchestrationError::database("begin_outcome", e))?;

        let event = StepEvent::Fail {
            message: message.to_string(),
            permanent,
        };
        let metadata = event.metadata();
        step_state_machine::transition_in(&mut tx, step.workflow_step_id, &event, metadata)
            .await
            .map_err(|e| OrchestrationError::StateTransitionFailed {
                entity_kind: "workflow_step",
                entity_id: step.workflow_step_id,
                reason: e.to_string(),
            })?;

        if permanent {
            step.record_permanent_failure(&mut tx)
                .await
                .map_err(|e| OrchestrationError::database("record_permanent_failure", e))?;
        } else {
            let delay = backoff.map(|b| b.delay_seconds as i32).unwrap_or(0);
            step.record_retryable_failure(&mut tx, delay)
                .await
                .map_err(|e| OrchestrationError::database("record_retryable_failure", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| OrchestrationError::database("commit_outcome", e))
    }

    fn publish_failure(
        &self,
        task: &Task,
        step: &WorkflowStep,
        step_name: &str,
        attempt_number: i32,
        message: &str,
        backoff: Option<&BackoffResult>,
    ) {
        let publisher = self.context.event_publisher();
        publisher.publish(
            OrchestrationEvent::for_step(
                names::STEP_FAILED,
                task.task_id,
                step.workflow_step_id,
                task.correlation_id,
            )
            .with_metadata(json!({
                "step_name": step_name,
                "attempt": attempt_number,
                "error": message,
            })),
        );
        if let Some(backoff) = backoff {
            publisher.publish(
                OrchestrationEvent::for_step(
                    names::STEP_BACKOFF,
                    task.task_id,
                    step.workflow_step_id,
                    task.correlation_id,
                )
                .with_metadata(json!({
                    "step_name": step_name,
                    "delay_seconds": backoff.delay_seconds,
                    "next_retry_at": backoff.next_retry_at.to_string(),
                })),
            );
        }
    }
}
