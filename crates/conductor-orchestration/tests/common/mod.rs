//! Shared harness for orchestration integration tests: deterministic
//! configuration (no jitter, short backoffs), canned handlers, and template
//! registration helpers.
//!
//! Not every test binary uses every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use conductor_orchestration::orchestration::handlers::{
    RetryAfter, StepHandler, StepHandlerError, StepHandlerRegistry, StepSequence,
};
use conductor_orchestration::orchestration::reenqueuer::InProcessReenqueuer;
use conductor_orchestration::orchestration::task_finalizer::{
    FinalizationAction, FinalizationResult,
};
use conductor_orchestration::orchestration::{
    TaskCoordinator, TaskInitializer, TaskRequestProcessor,
};
use conductor_shared::config::ConductorConfig;
use conductor_shared::models::core::{Task, TaskRequest, WorkflowStep};
use conductor_shared::registry::{StepTemplate, TaskTemplate, TaskTemplateRegistry};
use conductor_shared::system_context::SystemContext;

/// Deterministic test configuration: 1-second backoffs, no jitter, no
/// reenqueue padding.
pub fn test_config() -> ConductorConfig {
    let mut config = ConductorConfig::default();
    config.backoff.default_backoff_seconds = vec![1, 1, 1, 1, 1, 1];
    config.backoff.jitter_enabled = false;
    config.backoff.buffer_seconds = 0;
    config.backoff.reenqueue_delays.has_ready_steps = 0;
    config.backoff.reenqueue_delays.waiting_for_dependencies = 1;
    config.backoff.reenqueue_delays.processing = 0;
    config
}

/// Everything a scenario needs, wired the way the process boot would
pub struct TestHarness {
    pub context: Arc<SystemContext>,
    pub template_registry: Arc<TaskTemplateRegistry>,
    pub handler_registry: Arc<StepHandlerRegistry>,
    pub coordinator: TaskCoordinator,
    pub processor: TaskRequestProcessor,
}

impl TestHarness {
    pub async fn new(pool: sqlx::PgPool) -> Self {
        let context = Arc::new(SystemContext::new(pool.clone(), test_config()));
        let template_registry = Arc::new(TaskTemplateRegistry::new(pool));
        let handler_registry = Arc::new(StepHandlerRegistry::new());
        let (reenqueuer, _receiver) = InProcessReenqueuer::new();
        let reenqueuer = Arc::new(reenqueuer);

        let initializer = Arc::new(TaskInitializer::new(
            Arc::clone(&context),
            Arc::clone(&template_registry),
            Arc::clone(&handler_registry),
        ));
        let processor = TaskRequestProcessor::new(
            Arc::clone(&context),
            Arc::clone(&template_registry),
            Arc::clone(&initializer),
        );
        let coordinator = TaskCoordinator::new(
            Arc::clone(&context),
            Arc::clone(&handler_registry),
            Arc::clone(&template_registry),
            reenqueuer,
        );

        Self {
            context,
            template_registry,
            handler_registry,
            coordinator,
            processor,
        }
    }

    /// Drive coordinator cycles until the task settles (complete/error),
    /// sleeping through backoff windows between cycles.
    pub async fn run_until_settled(&self, task_id: i64, max_cycles: usize) -> FinalizationResult {
        let mut last = None;
        for _ in 0..max_cycles {
            let result = self
                .coordinator
                .handle(task_id)
                .await
                .expect("cycle should not error");
            match result.action {
                FinalizationAction::Completed | FinalizationAction::Failed => return result,
                _ => {
                    last = Some(result);
                    tokio::time::sleep(Duration::from_millis(1100)).await;
                }
            }
        }
        last.expect("at least one cycle ran")
    }
}

/// Handler that succeeds, recording invocation order
pub struct RecordingHandler {
    pub name: String,
    pub order: Arc<std::sync::Mutex<Vec<String>>>,
}

#[async_trait]
impl StepHandler for RecordingHandler {
    async fn handle(
        &self,
        _task: &Task,
        _sequence: &StepSequence,
        _step: &WorkflowStep,
    ) -> Result<Value, StepHandlerError> {
        self.order.lock().unwrap().push(self.name.clone());
        Ok(json!({ "handled_by": &self.name }))
    }
}

/// Handler that fails with a retryable error N times, then succeeds
pub struct FlakyHandler {
    pub failures_before_success: u32,
    pub seen: DashMap<i64, u32>,
}

impl FlakyHandler {
    pub fn new(failures_before_success: u32) -> Self {
        Self {
            failures_before_success,
            seen: DashMap::new(),
        }
    }
}

#[async_trait]
impl StepHandler for FlakyHandler {
    async fn handle(
        &self,
        _task: &Task,
        _sequence: &StepSequence,
        step: &WorkflowStep,
    ) -> Result<Value, StepHandlerError> {
        let mut attempts = self.seen.entry(step.workflow_step_id).or_insert(0);
        *attempts += 1;
        if *attempts <= self.failures_before_success {
            Err(StepHandlerError::retryable("upstream 503"))
        } else {
            Ok(json!({ "recovered_after": *attempts - 1 }))
        }
    }
}

/// Handler that always fails permanently
pub struct PermanentFailureHandler;

#[async_trait]
impl StepHandler for PermanentFailureHandler {
    async fn handle(
        &self,
        _task: &Task,
        _sequence: &StepSequence,
        _step: &WorkflowStep,
    ) -> Result<Value, StepHandlerError> {
        Err(StepHandlerError::permanent("422", "payload rejected"))
    }
}

/// Handler that fails once with a server-supplied retry delay
pub struct RetryAfterHandler {
    pub retry_after_seconds: u32,
}

#[async_trait]
impl StepHandler for RetryAfterHandler {
    async fn handle(
        &self,
        _task: &Task,
        _sequence: &StepSequence,
        _step: &WorkflowStep,
    ) -> Result<Value, StepHandlerError> {
        Err(StepHandlerError::retryable_after(
            "429 too many requests",
            RetryAfter::Seconds(self.retry_after_seconds),
        ))
    }
}

/// Handler that reads the previous step's results and echoes them forward
pub struct ChainingHandler {
    pub reads_from: String,
}

#[async_trait]
impl StepHandler for ChainingHandler {
    async fn handle(
        &self,
        _task: &Task,
        sequence: &StepSequence,
        _step: &WorkflowStep,
    ) -> Result<Value, StepHandlerError> {
        let upstream = sequence
            .results_for(&self.reads_from)
            .cloned()
            .unwrap_or(Value::Null);
        Ok(json!({ "upstream": upstream }))
    }
}

/// Register a linear A -> B -> C template and its handlers
pub async fn register_linear_workflow(
    harness: &TestHarness,
    order: Arc<std::sync::Mutex<Vec<String>>>,
) {
    let template = TaskTemplate::new("test", "linear_chain", "1.0.0")
        .with_step(StepTemplate::new("step_a", "test.step_a"))
        .with_step(StepTemplate::new("step_b", "test.step_b").depends_on(&["step_a"]))
        .with_step(StepTemplate::new("step_c", "test.step_c").depends_on(&["step_b"]));
    harness
        .template_registry
        .register(template)
        .await
        .expect("register template");

    for name in ["step_a", "step_b", "step_c"] {
        harness.handler_registry.register(
            format!("test.{name}"),
            Arc::new(RecordingHandler {
                name: name.to_string(),
                order: Arc::clone(&order),
            }),
        );
    }
}

/// Register a diamond A -> {B, C} -> D template and its handlers
pub async fn register_diamond_workflow(
    harness: &TestHarness,
    order: Arc<std::sync::Mutex<Vec<String>>>,
) {
    let template = TaskTemplate::new("test", "diamond", "1.0.0")
        .with_step(StepTemplate::new("start", "test.start"))
        .with_step(StepTemplate::new("branch_b", "test.branch_b").depends_on(&["start"]))
        .with_step(StepTemplate::new("branch_c", "test.branch_c").depends_on(&["start"]))
        .with_step(StepTemplate::new("end", "test.end").depends_on(&["branch_b", "branch_c"]));
    harness
        .template_registry
        .register(template)
        .await
        .expect("register template");

    for name in ["start", "branch_b", "branch_c", "end"] {
        harness.handler_registry.register(
            format!("test.{name}"),
            Arc::new(RecordingHandler {
                name: name.to_string(),
                order: Arc::clone(&order),
            }),
        );
    }
}

/// Minimal request for a registered template
pub fn request_for(name: &str) -> TaskRequest {
    TaskRequest::new(name, "test")
        .with_version("1.0.0")
        .with_context(json!({ "run": uuid::Uuid::new_v4().to_string() }))
        .with_initiator("integration_test")
        .with_source_system("test_harness")
        .with_reason("scenario")
}
