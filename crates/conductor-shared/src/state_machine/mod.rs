//! # State Machine
//!
//! Validates and durably records every task and step state change. Current
//! state is a projection of the append-only transition log: the `to_state`
//! of the row with the highest sort key, `pending` when no rows exist.

pub mod errors;
pub mod events;
pub mod states;
pub mod step_state_machine;
pub mod task_state_machine;

pub use errors::StateMachineError;
pub use events::{StepEvent, TaskEvent};
pub use states::{TaskState, WorkflowStepState};
pub use step_state_machine::StepStateMachine;
pub use task_state_machine::TaskStateMachine;
