//! # conductor-shared
//!
//! Shared components for the conductor workflow orchestrator: the data
//! model and persistence layer, the readiness query engine, the task/step
//! state machines over the append-only transition log, configuration, the
//! event bus, and the cache strategy.
//!
//! The orchestration loop itself (coordinator, executor, finalizer,
//! reenqueuer) lives in `conductor-orchestration`.

pub mod cache;
pub mod config;
pub mod database;
pub mod errors;
pub mod events;
pub mod logging;
pub mod models;
pub mod registry;
pub mod state_machine;
pub mod system_context;

pub use self::config::ConductorConfig;
pub use self::errors::{ConductorError, ConductorResult, OrchestrationError, OrchestrationResult};
pub use self::system_context::SystemContext;
