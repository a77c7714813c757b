//! # Orchestration Coordinator
//!
//! Per-task driver. One invocation runs one cycle: query readiness,
//! dispatch viable steps, repeat until nothing is dispatchable, then hand
//! the task to the finalizer. At most one cycle runs per task at a time,
//! enforced with a session advisory lock keyed by task id; a second caller
//! returns immediately without touching the task.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use conductor_shared::errors::{OrchestrationError, OrchestrationResult};
use conductor_shared::events::{names, OrchestrationEvent};
use conductor_shared::models::core::Task;
use conductor_shared::registry::TaskTemplateRegistry;
use conductor_shared::state_machine::{TaskEvent, TaskState, TaskStateMachine};
use conductor_shared::system_context::SystemContext;

use super::handlers::StepHandlerRegistry;
use super::reenqueuer::TaskReenqueuer;
use super::step_executor::StepExecutor;
use super::task_finalizer::{FinalizationAction, FinalizationResult, TaskFinalizer};
use super::viable_step_discovery::ViableStepDiscovery;

pub struct TaskCoordinator {
    context: Arc<SystemContext>,
    discovery: ViableStepDiscovery,
    executor: StepExecutor,
    finalizer: TaskFinalizer,
}

impl std::fmt::Debug for TaskCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCoordinator").finish()
    }
}

impl TaskCoordinator {
    pub fn new(
        context: Arc<SystemContext>,
        handler_registry: Arc<StepHandlerRegistry>,
        template_registry: Arc<TaskTemplateRegistry>,
        reenqueuer: Arc<dyn TaskReenqueuer>,
    ) -> Self {
        let discovery = ViableStepDiscovery::new(Arc::clone(&context));
        let executor = StepExecutor::new(
            Arc::clone(&context),
            handler_registry,
            template_registry,
        );
        let finalizer = TaskFinalizer::new(Arc::clone(&context), reenqueuer);
        Self {
            context,
            discovery,
            executor,
            finalizer,
        }
    }

    /// Run one orchestration cycle for a task. Completes it, fails it, or
    /// schedules a continuation.
    #[instrument(skip(self))]
    pub async fn handle(&self, task_id: i64) -> OrchestrationResult<FinalizationResult> {
        // Dedicated connection for the advisory lock; released on drop even
        // if the cycle errors out.
        let mut lock_conn = self
            .context
            .database_pool()
            .acquire()
            .await
            .map_err(|e| OrchestrationError::database("acquire_lock_conn", e))?;

        let (locked,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(task_id)
            .fetch_one(&mut *lock_conn)
            .await
            .map_err(|e| OrchestrationError::database("advisory_lock", e))?;

        if !locked {
            debug!(task_id = task_id, "Cycle already active; returning");
            return Ok(no_action(task_id, "cycle already active"));
        }

        let outcome = self.run_cycle(task_id).await;

        let _: Result<(bool,), _> = sqlx::query_as("SELECT pg_advisory_unlock($1)")
            .bind(task_id)
            .fetch_one(&mut *lock_conn)
            .await;

        outcome
    }

    async fn run_cycle(&self, task_id: i64) -> OrchestrationResult<FinalizationResult> {
        let task = Task::find_by_id(self.context.database_pool(), task_id)
            .await
            .map_err(|e| OrchestrationError::database("load_task", e))?
            .ok_or(OrchestrationError::TaskNotFound { task_id })?;

        let mut state_machine =
            TaskStateMachine::for_task(task_id, self.context.database_pool().clone());
        let state = state_machine
            .current_state()
            .await
            .map_err(|e| OrchestrationError::General(e.to_string()))?;

        if state.is_terminal() {
            debug!(task_id = task_id, state = %state, "Task already terminal; no-op");
            return Ok(no_action(task_id, "task already terminal"));
        }

        loop {
            // a cancellation lands here: stop dispatching at the cycle boundary
            let state = state_machine
                .current_state()
                .await
                .map_err(|e| OrchestrationError::General(e.to_string()))?;
            if state == TaskState::Cancelled {
                info!(task_id = task_id, "Task cancelled; halting dispatch");
                return Ok(no_action(task_id, "task cancelled"));
            }

            let viable = self.discovery.find_viable_steps(task_id).await?;
            if viable.is_empty() {
                break;
            }

            self.ensure_started(&task, &mut state_machine, state).await?;

            let sequence = self.discovery.get_step_sequence(task_id).await?;
            let results = self.executor.execute(&task, &sequence, &viable).await?;

            // every claim lost its race: another worker owns these steps
            if results.is_empty() {
                debug!(task_id = task_id, "No steps dispatched; ending cycle loop");
                break;
            }

            if self.finalizer.blocked_by_failures(task_id).await? {
                warn!(task_id = task_id, "Task blocked by failures; ending cycle loop");
                break;
            }
        }

        let result = self.finalizer.finalize(&task).await?;
        debug!(
            task_id = task_id,
            action = ?result.action,
            "Cycle finished"
        );
        Ok(result)
    }

    /// Move pending/error tasks into `in_progress` before the first
    /// dispatch of the cycle.
    async fn ensure_started(
        &self,
        task: &Task,
        state_machine: &mut TaskStateMachine,
        state: TaskState,
    ) -> OrchestrationResult<()> {
        if state != TaskState::Pending && state != TaskState::Error {
            return Ok(());
        }

        state_machine
            .transition(TaskEvent::Start)
            .await
            .map_err(|e| OrchestrationError::StateTransitionFailed {
                entity_kind: "task",
                entity_id: task.task_id,
                reason: e.to_string(),
            })?;

        self.context.event_publisher().publish(
            OrchestrationEvent::for_task(names::TASK_STARTED, task.task_id, task.correlation_id)
                .with_metadata(json!({
                    "resumed_from": state.to_string(),
                })),
        );
        Ok(())
    }
}

fn no_action(task_id: i64, reason: &str) -> FinalizationResult {
    FinalizationResult {
        task_id,
        action: FinalizationAction::NoAction,
        execution_status: None,
        reenqueue_delay_seconds: None,
        reason: Some(reason.to_string()),
    }
}
