//! # conductor-orchestration
//!
//! The orchestration loop for conductor workflows: per-task coordinator,
//! bounded-concurrency step executor, backoff calculator, task finalizer,
//! and the reenqueuer seam to the host job system.
//!
//! Data model, readiness queries, state machines, configuration, and the
//! event bus live in `conductor-shared`.

pub mod orchestration;

pub use orchestration::{
    FinalizationAction, FinalizationResult, StepHandler, StepHandlerError, StepHandlerRegistry,
    TaskCoordinator, TaskInitializer, TaskRequestProcessor,
};
