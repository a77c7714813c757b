//! # Task Request Processor
//!
//! Validates incoming task requests and hands the valid ones to the
//! initializer: payload validation, template existence, and the
//! duplicate-submission guard over the identity hash.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use conductor_shared::errors::{ConductorError, ConductorResult};
use conductor_shared::models::core::{Task, TaskRequest};
use conductor_shared::registry::TaskTemplateRegistry;
use conductor_shared::system_context::SystemContext;

use super::task_initializer::{TaskInitializationResult, TaskInitializer};

pub struct TaskRequestProcessor {
    context: Arc<SystemContext>,
    template_registry: Arc<TaskTemplateRegistry>,
    task_initializer: Arc<TaskInitializer>,
}

impl std::fmt::Debug for TaskRequestProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRequestProcessor").finish()
    }
}

impl TaskRequestProcessor {
    pub fn new(
        context: Arc<SystemContext>,
        template_registry: Arc<TaskTemplateRegistry>,
        task_initializer: Arc<TaskInitializer>,
    ) -> Self {
        Self {
            context,
            template_registry,
            task_initializer,
        }
    }

    /// Validate a request and create the task
    #[instrument(skip(self, request), fields(namespace = %request.namespace, name = %request.name))]
    pub async fn process_task_request(
        &self,
        request: TaskRequest,
    ) -> ConductorResult<TaskInitializationResult> {
        self.validate_task_request(&request).await?;

        let result = self
            .task_initializer
            .create_task_from_request(request)
            .await?;

        info!(
            task_id = result.task_id,
            step_count = result.step_count,
            correlation_id = %result.correlation_id,
            "Task request accepted"
        );
        Ok(result)
    }

    async fn validate_task_request(&self, request: &TaskRequest) -> ConductorResult<()> {
        if let Err(errors) = request.validate() {
            warn!(
                namespace = %request.namespace,
                name = %request.name,
                error = %errors,
                "Task request failed payload validation"
            );
            return Err(ConductorError::Validation(errors.to_string()));
        }

        // template lookup fails fast with UnknownTask
        self.template_registry
            .get_task_template(&request.namespace, &request.name, &request.version)?;

        let identity_hash = Task::identity_hash_for(request);
        let window_seconds = self.context.config().engine.duplicate_window_seconds;
        if let Some(existing) = Task::find_duplicate_in_window(
            self.context.database_pool(),
            &identity_hash,
            window_seconds,
        )
        .await?
        {
            warn!(
                namespace = %request.namespace,
                name = %request.name,
                existing_task_id = existing.task_id,
                "Duplicate task request rejected"
            );
            return Err(ConductorError::DuplicateTask {
                identity_hash,
                window_seconds,
            });
        }

        debug!(
            namespace = %request.namespace,
            name = %request.name,
            version = %request.version,
            "Task request validation successful"
        );
        Ok(())
    }
}
