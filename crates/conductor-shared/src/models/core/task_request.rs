//! Task request: the ingress payload asking for a new task instance.
//!
//! Optional attribution fields default to the literal string `"unknown"`
//! rather than NULL so downstream reporting never branches on absence.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

/// Request to instantiate a registered named task
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TaskRequest {
    /// Name of a registered named task
    #[validate(length(min = 1))]
    pub name: String,
    /// Namespace the named task lives in
    #[validate(length(min = 1))]
    pub namespace: String,
    /// Semver of the named task
    #[validate(length(min = 1))]
    pub version: String,
    /// Opaque input payload handed to step handlers
    pub context: Value,
    /// Who asked for this task
    #[serde(default = "TaskRequest::unknown")]
    pub initiator: String,
    /// Which system the request came from
    #[serde(default = "TaskRequest::unknown")]
    pub source_system: String,
    /// Why the task was requested
    #[serde(default = "TaskRequest::unknown")]
    pub reason: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Step names whose dependency contribution may be skipped (only honored
    /// for skippable steps)
    #[serde(default)]
    pub bypass_steps: Vec<String>,
    #[serde(default = "TaskRequest::now")]
    pub requested_at: NaiveDateTime,
    #[serde(default = "Uuid::new_v4")]
    pub correlation_id: Uuid,
}

impl TaskRequest {
    fn unknown() -> String {
        "unknown".to_string()
    }

    fn now() -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }

    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            version: "0.1.0".to_string(),
            context: Value::Object(serde_json::Map::new()),
            initiator: Self::unknown(),
            source_system: Self::unknown(),
            reason: Self::unknown(),
            tags: Vec::new(),
            bypass_steps: Vec::new(),
            requested_at: Self::now(),
            correlation_id: Uuid::new_v4(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = initiator.into();
        self
    }

    pub fn with_source_system(mut self, source_system: impl Into<String>) -> Self {
        self.source_system = source_system.into();
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_bypass_steps(mut self, bypass_steps: Vec<String>) -> Self {
        self.bypass_steps = bypass_steps;
        self
    }

    pub fn with_requested_at(mut self, requested_at: NaiveDateTime) -> Self {
        self.requested_at = requested_at;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_defaults_to_unknown_attribution() {
        let request = TaskRequest::new("process_order", "fulfillment");
        assert_eq!(request.initiator, "unknown");
        assert_eq!(request.source_system, "unknown");
        assert_eq!(request.reason, "unknown");
        assert!(request.tags.is_empty());
        assert!(request.bypass_steps.is_empty());
    }

    #[test]
    fn test_builder_chain() {
        let request = TaskRequest::new("process_order", "fulfillment")
            .with_version("1.2.0")
            .with_context(json!({"order_id": 42}))
            .with_initiator("api_gateway")
            .with_reason("customer checkout");
        assert_eq!(request.version, "1.2.0");
        assert_eq!(request.context["order_id"], 42);
        assert_eq!(request.initiator, "api_gateway");
        assert_eq!(request.reason, "customer checkout");
    }

    #[test]
    fn test_deserialization_fills_defaults() {
        let request: TaskRequest = serde_json::from_value(json!({
            "name": "process_order",
            "namespace": "fulfillment",
            "version": "1.0.0",
            "context": {"order_id": 7}
        }))
        .expect("deserialize");
        assert_eq!(request.initiator, "unknown");
        assert_eq!(request.source_system, "unknown");
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_empty_name_fails_validation() {
        let mut request = TaskRequest::new("", "fulfillment");
        request.version = "1.0.0".to_string();
        assert!(request.validate().is_err());
    }
}
