//! # Task Initializer
//!
//! Instantiates a validated task request: the task row, one workflow step
//! per template step, and the dependency edges. Workflow-definition
//! problems (cycles, dangling dependencies, unregistered handlers) fail
//! here, before anything executes.
//!
//! Bypassed skippable steps are pruned at instantiation: no step row, no
//! edges, so their dependents start with those dependencies satisfied.
//! Bypass names that refer to non-skippable steps are ignored.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use conductor_shared::errors::{ConductorError, ConductorResult};
use conductor_shared::events::{names, OrchestrationEvent};
use conductor_shared::models::core::workflow_step_edge::DEFAULT_EDGE_NAME;
use conductor_shared::models::core::{
    DependentSystem, NamedStep, NamedTask, NewWorkflowStep, Task, TaskRequest, WorkflowStep,
    WorkflowStepEdge,
};
use conductor_shared::registry::TaskTemplateRegistry;
use conductor_shared::system_context::SystemContext;

use super::handlers::StepHandlerRegistry;

#[derive(Debug, Clone)]
pub struct TaskInitializationResult {
    pub task_id: i64,
    pub step_count: usize,
    pub bypassed_steps: Vec<String>,
    pub correlation_id: uuid::Uuid,
}

pub struct TaskInitializer {
    context: Arc<SystemContext>,
    template_registry: Arc<TaskTemplateRegistry>,
    handler_registry: Arc<StepHandlerRegistry>,
}

impl std::fmt::Debug for TaskInitializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskInitializer").finish()
    }
}

impl TaskInitializer {
    pub fn new(
        context: Arc<SystemContext>,
        template_registry: Arc<TaskTemplateRegistry>,
        handler_registry: Arc<StepHandlerRegistry>,
    ) -> Self {
        Self {
            context,
            template_registry,
            handler_registry,
        }
    }

    /// Create the task, its steps, and its edges from a validated request
    pub async fn create_task_from_request(
        &self,
        request: TaskRequest,
    ) -> ConductorResult<TaskInitializationResult> {
        let template = self.template_registry.get_task_template(
            &request.namespace,
            &request.name,
            &request.version,
        )?;
        template.validate()?;

        for step in &template.steps {
            if !self.handler_registry.contains(&step.handler_class) {
                return Err(ConductorError::Configuration(format!(
                    "no handler registered for class '{}' (step '{}')",
                    step.handler_class, step.name
                )));
            }
        }

        let pool = self.context.database_pool();
        let named_task =
            NamedTask::find_by_full_name(pool, &request.namespace, &request.name, &request.version)
                .await?
                .ok_or_else(|| ConductorError::UnknownTask {
                    namespace: request.namespace.clone(),
                    name: request.name.clone(),
                    version: request.version.clone(),
                })?;

        let ordered = template.topological_order()?;
        let bypassed_steps: Vec<String> = ordered
            .iter()
            .filter(|s| request.bypass_steps.contains(&s.name) && s.skippable)
            .map(|s| s.name.clone())
            .collect();
        if bypassed_steps.len() == ordered.len() {
            return Err(ConductorError::Configuration(format!(
                "every step of {}/{} was bypassed; nothing to execute",
                request.namespace, request.name
            )));
        }

        let task = Task::create_from_request(pool, named_task.named_task_id, &request)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                    ConductorError::DuplicateTask {
                        identity_hash: Task::identity_hash_for(&request),
                        window_seconds: self.context.config().engine.duplicate_window_seconds,
                    }
                }
                _ => ConductorError::from(e),
            })?;

        let mut created: HashMap<String, WorkflowStep> = HashMap::new();

        for (position, step_template) in ordered.iter().enumerate() {
            if bypassed_steps.contains(&step_template.name) {
                debug!(
                    task_id = task.task_id,
                    step_name = %step_template.name,
                    "Bypassing skippable step at instantiation"
                );
                continue;
            }

            let system =
                DependentSystem::find_or_create(pool, &step_template.dependent_system).await?;
            let named_step =
                NamedStep::find_or_create(pool, system.dependent_system_id, &step_template.name)
                    .await?;

            let step = WorkflowStep::create(
                pool,
                NewWorkflowStep {
                    task_id: task.task_id,
                    named_step_id: named_step.named_step_id,
                    sort_key: position as i32,
                    retry_limit: step_template.default_retry_limit,
                    retryable: step_template.default_retryable,
                    skippable: step_template.skippable,
                    inputs: None,
                },
            )
            .await?;
            created.insert(step_template.name.clone(), step);
        }

        let mut edge_count = 0;
        for step_template in &ordered {
            let Some(to_step) = created.get(&step_template.name) else {
                continue;
            };
            for dependency in &step_template.depends_on {
                // bypassed parents contribute no edge: dependency satisfied
                let Some(from_step) = created.get(dependency) else {
                    continue;
                };
                WorkflowStepEdge::create(
                    pool,
                    from_step.workflow_step_id,
                    to_step.workflow_step_id,
                    DEFAULT_EDGE_NAME,
                )
                .await?;
                edge_count += 1;
            }
        }

        self.context.event_publisher().publish(
            OrchestrationEvent::for_task(
                names::TASK_INITIALIZED,
                task.task_id,
                task.correlation_id,
            )
            .with_metadata(json!({
                "namespace": &request.namespace,
                "name": &request.name,
                "version": &request.version,
                "step_count": created.len(),
                "edge_count": edge_count,
                "bypassed_steps": &bypassed_steps,
            })),
        );

        info!(
            task_id = task.task_id,
            namespace = %request.namespace,
            name = %request.name,
            step_count = created.len(),
            edge_count = edge_count,
            "Task initialized"
        );

        Ok(TaskInitializationResult {
            task_id: task.task_id,
            step_count: created.len(),
            bypassed_steps,
            correlation_id: task.correlation_id,
        })
    }
}
