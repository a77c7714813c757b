//! # Task Finalizer
//!
//! After each cycle, interprets the task's execution context and chooses
//! one of five outcomes: terminal complete, terminal error, reenqueue now,
//! reenqueue delayed, or leave the in-flight work alone.
//!
//! | execution_status           | action                                        |
//! |----------------------------|-----------------------------------------------|
//! | all_complete               | task -> complete, no reenqueue                |
//! | blocked_by_failures        | task -> error, no reenqueue                   |
//! | has_ready_steps            | reenqueue immediately (+ buffer)              |
//! | waiting_for_dependencies   | reenqueue at max(delay, next retry) + buffer  |
//! | processing                 | reenqueue with the processing delay + buffer  |

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use conductor_shared::errors::{ConductorError, OrchestrationError, OrchestrationResult};
use conductor_shared::events::{names, OrchestrationEvent};
use conductor_shared::models::core::Task;
use conductor_shared::models::orchestration::{ExecutionStatus, TaskExecutionContext};
use conductor_shared::state_machine::errors::StateMachineError;
use conductor_shared::state_machine::{TaskEvent, TaskStateMachine};
use conductor_shared::system_context::SystemContext;

use super::backoff_calculator::BackoffCalculator;
use super::reenqueuer::TaskReenqueuer;
use super::viable_step_discovery::ViableStepDiscovery;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizationAction {
    Completed,
    Failed,
    Reenqueued,
    NoAction,
}

#[derive(Debug, Clone)]
pub struct FinalizationResult {
    pub task_id: i64,
    pub action: FinalizationAction,
    pub execution_status: Option<ExecutionStatus>,
    pub reenqueue_delay_seconds: Option<u32>,
    pub reason: Option<String>,
}

impl FinalizationResult {
    /// Caller-facing error for terminal failure outcomes; None for every
    /// other action.
    pub fn as_error(&self) -> Option<ConductorError> {
        match self.action {
            FinalizationAction::Failed => Some(ConductorError::TaskBlocked {
                task_id: self.task_id,
                reason: self
                    .reason
                    .clone()
                    .unwrap_or_else(|| "blocked by failures".to_string()),
            }),
            _ => None,
        }
    }
}

pub struct TaskFinalizer {
    context: Arc<SystemContext>,
    discovery: ViableStepDiscovery,
    backoff_calculator: BackoffCalculator,
    reenqueuer: Arc<dyn TaskReenqueuer>,
}

impl std::fmt::Debug for TaskFinalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFinalizer").finish()
    }
}

impl TaskFinalizer {
    pub fn new(context: Arc<SystemContext>, reenqueuer: Arc<dyn TaskReenqueuer>) -> Self {
        let discovery = ViableStepDiscovery::new(Arc::clone(&context));
        let backoff_calculator = BackoffCalculator::new(context.config().backoff.clone());
        Self {
            context,
            discovery,
            backoff_calculator,
            reenqueuer,
        }
    }

    /// Whether the task's failures admit no retry path
    pub async fn blocked_by_failures(&self, task_id: i64) -> OrchestrationResult<bool> {
        let context = self.discovery.get_execution_context(task_id).await?;
        Ok(context
            .map(|c| c.execution_status == ExecutionStatus::BlockedByFailures)
            .unwrap_or(false))
    }

    /// Interpret the execution context and settle the cycle
    pub async fn finalize(&self, task: &Task) -> OrchestrationResult<FinalizationResult> {
        let Some(context) = self.discovery.get_execution_context(task.task_id).await? else {
            warn!(
                task_id = task.task_id,
                "No execution context for task; transitioning to error"
            );
            return self.error_task(task, None).await;
        };

        debug!(
            task_id = task.task_id,
            execution_status = %context.execution_status,
            completed = context.completed_steps,
            total = context.total_steps,
            "Finalizing task cycle"
        );

        match context.execution_status {
            ExecutionStatus::AllComplete => self.complete_task(task, &context).await,
            ExecutionStatus::BlockedByFailures => self.error_task(task, Some(&context)).await,
            ExecutionStatus::HasReadySteps
            | ExecutionStatus::WaitingForDependencies
            | ExecutionStatus::Processing => self.reenqueue_task(task, &context).await,
        }
    }

    async fn complete_task(
        &self,
        task: &Task,
        context: &TaskExecutionContext,
    ) -> OrchestrationResult<FinalizationResult> {
        let mut state_machine =
            TaskStateMachine::for_task(task.task_id, self.context.database_pool().clone());

        match state_machine.transition(TaskEvent::Complete).await {
            Ok(_) => {}
            // already terminal: a re-run on a settled task is a no-op
            Err(StateMachineError::InvalidTransition { .. }) => {
                return Ok(FinalizationResult {
                    task_id: task.task_id,
                    action: FinalizationAction::NoAction,
                    execution_status: Some(context.execution_status),
                    reenqueue_delay_seconds: None,
                    reason: Some("already finalized".to_string()),
                });
            }
            Err(e) => {
                return Err(OrchestrationError::FinalizationFailed {
                    task_id: task.task_id,
                    reason: e.to_string(),
                })
            }
        }

        task.mark_complete(self.context.database_pool())
            .await
            .map_err(|e| OrchestrationError::database("mark_complete", e))?;

        self.context.event_publisher().publish(
            OrchestrationEvent::for_task(names::TASK_COMPLETED, task.task_id, task.correlation_id)
                .with_metadata(json!({
                    "total_steps": context.total_steps,
                })),
        );

        info!(
            task_id = task.task_id,
            total_steps = context.total_steps,
            "Task complete"
        );

        Ok(FinalizationResult {
            task_id: task.task_id,
            action: FinalizationAction::Completed,
            execution_status: Some(context.execution_status),
            reenqueue_delay_seconds: None,
            reason: None,
        })
    }

    async fn error_task(
        &self,
        task: &Task,
        context: Option<&TaskExecutionContext>,
    ) -> OrchestrationResult<FinalizationResult> {
        let failures = Task::failure_details(self.context.database_pool(), task.task_id)
            .await
            .map_err(|e| OrchestrationError::database("failure_details", e))?;

        let parts: Vec<String> = failures
            .iter()
            .map(|f| {
                if f.attempts >= f.retry_limit.max(1) {
                    ConductorError::RetryExhausted {
                        step_id: f.workflow_step_id,
                        attempts: f.attempts,
                        retry_limit: f.retry_limit,
                    }
                    .to_string()
                } else {
                    format!("step '{}' failed permanently", f.step_name)
                }
            })
            .collect();
        let summary = if parts.is_empty() {
            "task blocked with no failure details".to_string()
        } else {
            parts.join("; ")
        };

        let mut state_machine =
            TaskStateMachine::for_task(task.task_id, self.context.database_pool().clone());
        match state_machine.transition(TaskEvent::Fail(summary.clone())).await {
            Ok(_) => {}
            Err(StateMachineError::InvalidTransition { .. }) => {
                return Ok(FinalizationResult {
                    task_id: task.task_id,
                    action: FinalizationAction::NoAction,
                    execution_status: context.map(|c| c.execution_status),
                    reenqueue_delay_seconds: None,
                    reason: Some("already finalized".to_string()),
                });
            }
            Err(e) => {
                return Err(OrchestrationError::FinalizationFailed {
                    task_id: task.task_id,
                    reason: e.to_string(),
                })
            }
        }

        self.context.event_publisher().publish(
            OrchestrationEvent::for_task(names::TASK_FAILED, task.task_id, task.correlation_id)
                .with_metadata(json!({
                    "failed_steps": failures
                        .iter()
                        .map(|f| json!({
                            "step_name": &f.step_name,
                            "attempts": f.attempts,
                            "last_failure_at": f.last_failure_at.map(|t| t.to_string()),
                            "error": &f.error_message,
                        }))
                        .collect::<Vec<_>>(),
                })),
        );

        warn!(
            task_id = task.task_id,
            failed_steps = failures.len(),
            "Task moved to error"
        );

        Ok(FinalizationResult {
            task_id: task.task_id,
            action: FinalizationAction::Failed,
            execution_status: context.map(|c| c.execution_status),
            reenqueue_delay_seconds: None,
            reason: Some(summary),
        })
    }

    async fn reenqueue_task(
        &self,
        task: &Task,
        context: &TaskExecutionContext,
    ) -> OrchestrationResult<FinalizationResult> {
        let delay_seconds = self.reenqueue_delay_seconds(context);

        self.reenqueuer
            .enqueue(task.task_id, Duration::from_secs(delay_seconds as u64))
            .await?;

        self.context.event_publisher().publish(
            OrchestrationEvent::for_task(names::TASK_REENQUEUED, task.task_id, task.correlation_id)
                .with_metadata(json!({
                    "execution_status": context.execution_status.to_string(),
                    "delay_seconds": delay_seconds,
                })),
        );

        debug!(
            task_id = task.task_id,
            execution_status = %context.execution_status,
            delay_seconds = delay_seconds,
            "Task reenqueued"
        );

        Ok(FinalizationResult {
            task_id: task.task_id,
            action: FinalizationAction::Reenqueued,
            execution_status: Some(context.execution_status),
            reenqueue_delay_seconds: Some(delay_seconds),
            reason: None,
        })
    }

    /// Delay before the next cycle. Waiting tasks stretch to the earliest
    /// failed-step retry time so the next cycle isn't wasted inside a
    /// backoff window.
    fn reenqueue_delay_seconds(&self, context: &TaskExecutionContext) -> u32 {
        let base = self
            .backoff_calculator
            .base_reenqueue_delay(context.execution_status);

        let effective = match context.execution_status {
            ExecutionStatus::WaitingForDependencies => {
                let until_retry = context
                    .min_next_retry_at
                    .map(|at| (at - chrono::Utc::now().naive_utc()).num_seconds().max(0) as u32)
                    .unwrap_or(0);
                base.max(until_retry)
            }
            _ => base,
        };

        effective + self.backoff_calculator.buffer_seconds()
    }
}
