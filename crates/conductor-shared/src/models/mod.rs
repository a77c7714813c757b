//! Data model.
//!
//! `core` holds the writable rows, `orchestration` the readiness/context
//! projections produced by the query engine.

pub mod core;
pub mod orchestration;

pub use self::core::{Task, TaskRequest, WorkflowStep};
