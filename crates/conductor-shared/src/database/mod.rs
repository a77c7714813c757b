//! Persistence layer: embedded migrations and the readiness query engine.

pub mod migrator;
pub mod sql_functions;

pub use sql_functions::{SqlFunctionExecutor, SystemHealthCounts};
