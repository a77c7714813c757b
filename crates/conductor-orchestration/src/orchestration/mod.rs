//! # Orchestration
//!
//! The step-readiness + execution + finalization loop. One task cycle:
//! coordinator -> readiness engine -> executor (fan-out to handlers) ->
//! state machine per step -> finalizer -> reenqueuer, with the event bus
//! firing at every boundary crossing.

pub mod backoff_calculator;
pub mod coordinator;
pub mod handlers;
pub mod reenqueuer;
pub mod step_executor;
pub mod system_health;
pub mod task_finalizer;
pub mod task_initializer;
pub mod task_request_processor;
pub mod viable_step_discovery;

pub use backoff_calculator::{BackoffCalculator, BackoffResult, BackoffType};
pub use coordinator::TaskCoordinator;
pub use handlers::{
    RetryAfter, StepHandler, StepHandlerError, StepHandlerRegistry, StepSequence,
};
pub use reenqueuer::{InProcessReenqueuer, ReenqueuedTask, TaskReenqueuer};
pub use step_executor::{StepExecutor, StepOutcome, StepResult};
pub use system_health::{ConcurrencyGovernor, SystemLoad, SystemPressure};
pub use task_finalizer::{FinalizationAction, FinalizationResult, TaskFinalizer};
pub use task_initializer::{TaskInitializationResult, TaskInitializer};
pub use task_request_processor::TaskRequestProcessor;
pub use viable_step_discovery::ViableStepDiscovery;
