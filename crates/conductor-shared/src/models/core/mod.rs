//! Core persistence models: registry rows, task instances, step instances,
//! edges, and the append-only transition logs.

pub mod dependent_system;
pub mod named_step;
pub mod named_task;
pub mod task;
pub mod task_namespace;
pub mod task_request;
pub mod task_transition;
pub mod workflow_step;
pub mod workflow_step_edge;
pub mod workflow_step_transition;

pub use dependent_system::{DependentSystem, DependentSystemObjectMap};
pub use named_step::NamedStep;
pub use named_task::{NamedTask, NamedTasksNamedStep};
pub use task::{StepFailureDetail, Task};
pub use task_namespace::TaskNamespace;
pub use task_request::TaskRequest;
pub use task_transition::{NewTaskTransition, TaskTransition};
pub use workflow_step::{NewWorkflowStep, WorkflowStep};
pub use workflow_step_edge::WorkflowStepEdge;
pub use workflow_step_transition::{NewWorkflowStepTransition, WorkflowStepTransition};
