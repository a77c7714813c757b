//! # Task Template Registry
//!
//! Holds registered workflow definitions: a named task at a version plus
//! its step templates and their dependency declarations. Registration
//! validates the DAG (cycles, dangling dependencies, duplicate names) and
//! persists the `named_*` registry rows; instantiation happens elsewhere.
//!
//! Templates are immutable per version. How definitions get here (YAML,
//! API, code) is the caller's concern.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::info;

use crate::errors::{ConductorError, ConductorResult};
use crate::models::core::{
    DependentSystem, NamedStep, NamedTask, NamedTasksNamedStep, TaskNamespace,
};

/// One step definition inside a task template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTemplate {
    pub name: String,
    /// External collaborator this step talks to
    #[serde(default = "StepTemplate::default_dependent_system")]
    pub dependent_system: String,
    /// Registry key of the handler that executes this step
    pub handler_class: String,
    #[serde(default = "StepTemplate::default_retryable")]
    pub default_retryable: bool,
    #[serde(default = "StepTemplate::default_retry_limit")]
    pub default_retry_limit: i32,
    #[serde(default)]
    pub skippable: bool,
    /// Names of steps that must complete first
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl StepTemplate {
    fn default_dependent_system() -> String {
        "unknown".to_string()
    }

    fn default_retryable() -> bool {
        true
    }

    fn default_retry_limit() -> i32 {
        3
    }

    pub fn new(name: impl Into<String>, handler_class: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependent_system: Self::default_dependent_system(),
            handler_class: handler_class.into(),
            default_retryable: Self::default_retryable(),
            default_retry_limit: Self::default_retry_limit(),
            skippable: false,
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(mut self, names: &[&str]) -> Self {
        self.depends_on = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn retry_limit(mut self, retry_limit: i32) -> Self {
        self.default_retry_limit = retry_limit;
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.default_retryable = retryable;
        self
    }

    pub fn skippable(mut self, skippable: bool) -> Self {
        self.skippable = skippable;
        self
    }

    pub fn dependent_system(mut self, system: impl Into<String>) -> Self {
        self.dependent_system = system.into();
        self
    }
}

/// A registered workflow: named task + ordered step templates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub configuration: Option<Value>,
    pub steps: Vec<StepTemplate>,
}

impl TaskTemplate {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
            configuration: None,
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: StepTemplate) -> Self {
        self.steps.push(step);
        self
    }

    fn key(namespace: &str, name: &str, version: &str) -> String {
        format!("{namespace}/{name}/{version}")
    }

    /// Reject templates that could never execute: empty, duplicate step
    /// names, dependencies on unknown steps, or cyclic dependency graphs.
    pub fn validate(&self) -> ConductorResult<()> {
        if self.steps.is_empty() {
            return Err(ConductorError::Configuration(format!(
                "task template {}/{} has no steps",
                self.namespace, self.name
            )));
        }

        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.name.as_str()) {
                return Err(ConductorError::Configuration(format!(
                    "duplicate step name '{}' in template {}/{}",
                    step.name, self.namespace, self.name
                )));
            }
        }

        for step in &self.steps {
            for dependency in &step.depends_on {
                if !names.contains(dependency.as_str()) {
                    return Err(ConductorError::Configuration(format!(
                        "step '{}' depends on unknown step '{}' in template {}/{}",
                        step.name, dependency, self.namespace, self.name
                    )));
                }
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Kahn's algorithm over step names; errors on a cycle. The returned
    /// order is the instantiation sort key assignment.
    pub fn topological_order(&self) -> ConductorResult<Vec<&StepTemplate>> {
        let by_name: HashMap<&str, &StepTemplate> =
            self.steps.iter().map(|s| (s.name.as_str(), s)).collect();

        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        for step in &self.steps {
            in_degree.entry(step.name.as_str()).or_insert(0);
            for dependency in &step.depends_on {
                *in_degree.entry(step.name.as_str()).or_insert(0) += 1;
                children
                    .entry(dependency.as_str())
                    .or_default()
                    .push(step.name.as_str());
            }
        }

        // seed with declaration order for a stable result
        let mut queue: VecDeque<&str> = self
            .steps
            .iter()
            .filter(|s| in_degree[s.name.as_str()] == 0)
            .map(|s| s.name.as_str())
            .collect();

        let mut ordered = Vec::with_capacity(self.steps.len());
        while let Some(name) = queue.pop_front() {
            ordered.push(by_name[name]);
            if let Some(dependents) = children.get(name) {
                for &dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dependent);
                        }
                    }
                }
            }
        }

        if ordered.len() != self.steps.len() {
            return Err(ConductorError::Configuration(format!(
                "cyclic step dependencies in template {}/{}",
                self.namespace, self.name
            )));
        }
        Ok(ordered)
    }
}

/// In-process registry backed by the `named_*` tables
#[derive(Debug)]
pub struct TaskTemplateRegistry {
    pool: PgPool,
    templates: DashMap<String, Arc<TaskTemplate>>,
}

impl TaskTemplateRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            templates: DashMap::new(),
        }
    }

    /// Validate a template, persist its registry rows, and make it
    /// resolvable for task requests.
    pub async fn register(&self, template: TaskTemplate) -> ConductorResult<Arc<TaskTemplate>> {
        template.validate()?;

        let namespace = TaskNamespace::find_or_create(&self.pool, &template.namespace).await?;
        let named_task = NamedTask::find_or_create(
            &self.pool,
            namespace.task_namespace_id,
            &template.name,
            &template.version,
            template.configuration.clone(),
        )
        .await?;

        for step in &template.steps {
            let system = DependentSystem::find_or_create(&self.pool, &step.dependent_system).await?;
            let named_step =
                NamedStep::find_or_create(&self.pool, system.dependent_system_id, &step.name)
                    .await?;
            NamedTasksNamedStep::find_or_create(
                &self.pool,
                named_task.named_task_id,
                named_step.named_step_id,
                step.skippable,
                step.default_retryable,
                step.default_retry_limit,
            )
            .await?;
        }

        let key = TaskTemplate::key(&template.namespace, &template.name, &template.version);
        let template = Arc::new(template);
        self.templates.insert(key, Arc::clone(&template));

        info!(
            namespace = %template.namespace,
            name = %template.name,
            version = %template.version,
            step_count = template.steps.len(),
            "Registered task template"
        );
        Ok(template)
    }

    /// Resolve a registered template or fail with `UnknownTask`
    pub fn get_task_template(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> ConductorResult<Arc<TaskTemplate>> {
        self.templates
            .get(&TaskTemplate::key(namespace, name, version))
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ConductorError::UnknownTask {
                namespace: namespace.to_string(),
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    pub fn template_count(&self) -> usize {
        self.templates.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_template() -> TaskTemplate {
        TaskTemplate::new("fulfillment", "process_order", "1.0.0")
            .with_step(StepTemplate::new("validate", "handlers.validate"))
            .with_step(StepTemplate::new("charge", "handlers.charge").depends_on(&["validate"]))
            .with_step(StepTemplate::new("ship", "handlers.ship").depends_on(&["charge"]))
    }

    #[test]
    fn test_valid_template_passes() {
        assert!(linear_template().validate().is_ok());
    }

    #[test]
    fn test_topological_order_is_stable() {
        let template = linear_template();
        let ordered = template.topological_order().expect("order");
        let names: Vec<&str> = ordered.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["validate", "charge", "ship"]);
    }

    #[test]
    fn test_diamond_orders_branches_in_declaration_order() {
        let template = TaskTemplate::new("demo", "diamond", "1.0.0")
            .with_step(StepTemplate::new("start", "h.start"))
            .with_step(StepTemplate::new("left", "h.left").depends_on(&["start"]))
            .with_step(StepTemplate::new("right", "h.right").depends_on(&["start"]))
            .with_step(StepTemplate::new("end", "h.end").depends_on(&["left", "right"]));
        let ordered = template.topological_order().expect("order");
        let names: Vec<&str> = ordered.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["start", "left", "right", "end"]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let template = TaskTemplate::new("demo", "cyclic", "1.0.0")
            .with_step(StepTemplate::new("a", "h.a").depends_on(&["b"]))
            .with_step(StepTemplate::new("b", "h.b").depends_on(&["a"]));
        let error = template.validate().unwrap_err();
        assert!(matches!(error, ConductorError::Configuration(_)));
        assert!(error.to_string().contains("cyclic"));
    }

    #[test]
    fn test_dangling_dependency_is_rejected() {
        let template = TaskTemplate::new("demo", "dangling", "1.0.0")
            .with_step(StepTemplate::new("a", "h.a").depends_on(&["ghost"]));
        let error = template.validate().unwrap_err();
        assert!(error.to_string().contains("ghost"));
    }

    #[test]
    fn test_duplicate_step_name_is_rejected() {
        let template = TaskTemplate::new("demo", "duplicated", "1.0.0")
            .with_step(StepTemplate::new("a", "h.a"))
            .with_step(StepTemplate::new("a", "h.other"));
        let error = template.validate().unwrap_err();
        assert!(error.to_string().contains("duplicate"));
    }

    #[test]
    fn test_empty_template_is_rejected() {
        let template = TaskTemplate::new("demo", "empty", "1.0.0");
        assert!(template.validate().is_err());
    }

    #[test]
    fn test_step_template_defaults() {
        let step = StepTemplate::new("fetch", "h.fetch");
        assert!(step.default_retryable);
        assert_eq!(step.default_retry_limit, 3);
        assert!(!step.skippable);
        assert_eq!(step.dependent_system, "unknown");
    }
}
