//! # Event Bus
//!
//! Synchronous publish with multiple named subscribers. Subscriber failures
//! are caught and logged; they never fail the workflow. Subscribers that
//! forward metrics must hand off to their own channel or buffer rather than
//! doing network I/O inline.

use chrono::NaiveDateTime;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Event names published by the orchestration loop
pub mod names {
    pub const TASK_INITIALIZED: &str = "task.initialized";
    pub const TASK_STARTED: &str = "task.started";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_REENQUEUED: &str = "task.reenqueued";
    pub const STEP_BEFORE_HANDLE: &str = "step.before_handle";
    pub const STEP_COMPLETED: &str = "step.completed";
    pub const STEP_FAILED: &str = "step.failed";
    pub const STEP_BACKOFF: &str = "step.backoff";
    pub const STEP_TIMEOUT: &str = "step.timeout";
}

/// One boundary-crossing notification
#[derive(Debug, Clone)]
pub struct OrchestrationEvent {
    pub name: &'static str,
    pub task_id: i64,
    pub workflow_step_id: Option<i64>,
    pub correlation_id: Uuid,
    pub metadata: Value,
    pub occurred_at: NaiveDateTime,
}

impl OrchestrationEvent {
    pub fn for_task(name: &'static str, task_id: i64, correlation_id: Uuid) -> Self {
        Self {
            name,
            task_id,
            workflow_step_id: None,
            correlation_id,
            metadata: json!({}),
            occurred_at: chrono::Utc::now().naive_utc(),
        }
    }

    pub fn for_step(
        name: &'static str,
        task_id: i64,
        workflow_step_id: i64,
        correlation_id: Uuid,
    ) -> Self {
        Self {
            name,
            task_id,
            workflow_step_id: Some(workflow_step_id),
            correlation_id,
            metadata: json!({}),
            occurred_at: chrono::Utc::now().naive_utc(),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A named consumer of orchestration events. Implementations must be cheap
/// and non-blocking; publish happens on the hot path.
pub trait EventSubscriber: Send + Sync {
    fn name(&self) -> &str;

    fn handle(&self, event: &OrchestrationEvent) -> anyhow::Result<()>;
}

/// Atomic counters aggregated across all published events
#[derive(Debug, Default)]
pub struct EventStatistics {
    events_published: AtomicU64,
    subscriber_failures: AtomicU64,
    by_name: DashMap<&'static str, u64>,
}

impl EventStatistics {
    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    pub fn subscriber_failures(&self) -> u64 {
        self.subscriber_failures.load(Ordering::Relaxed)
    }

    pub fn count_for(&self, name: &str) -> u64 {
        self.by_name.get(name).map(|entry| *entry).unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<&'static str, u64> {
        self.by_name
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    fn record(&self, event: &OrchestrationEvent) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        *self.by_name.entry(event.name).or_insert(0) += 1;
    }

    fn record_failure(&self) {
        self.subscriber_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Built-in subscriber that mirrors events into structured logs
#[derive(Debug)]
pub struct LogSubscriber;

impl EventSubscriber for LogSubscriber {
    fn name(&self) -> &str {
        "log"
    }

    fn handle(&self, event: &OrchestrationEvent) -> anyhow::Result<()> {
        debug!(
            event = event.name,
            task_id = event.task_id,
            workflow_step_id = ?event.workflow_step_id,
            correlation_id = %event.correlation_id,
            "Orchestration event"
        );
        Ok(())
    }
}

/// Synchronous fan-out publisher
pub struct EventPublisher {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
    statistics: Arc<EventStatistics>,
    /// Metadata key under which the correlation id is injected
    correlation_id_header: String,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.subscribers.read().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("EventPublisher")
            .field("subscriber_count", &count)
            .field("correlation_id_header", &self.correlation_id_header)
            .finish()
    }
}

impl EventPublisher {
    pub fn new(correlation_id_header: impl Into<String>) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            statistics: Arc::new(EventStatistics::default()),
            correlation_id_header: correlation_id_header.into(),
        }
    }

    /// Publisher with the log subscriber pre-registered
    pub fn with_default_subscribers(correlation_id_header: impl Into<String>) -> Self {
        let publisher = Self::new(correlation_id_header);
        publisher.subscribe(Arc::new(LogSubscriber));
        publisher
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.push(subscriber);
        }
    }

    pub fn statistics(&self) -> Arc<EventStatistics> {
        Arc::clone(&self.statistics)
    }

    /// Deliver an event to every subscriber in registration order. The
    /// correlation id is injected into metadata under the configured header
    /// name before delivery.
    pub fn publish(&self, mut event: OrchestrationEvent) {
        if let Value::Object(ref mut map) = event.metadata {
            map.insert(
                self.correlation_id_header.clone(),
                Value::String(event.correlation_id.to_string()),
            );
        }

        self.statistics.record(&event);

        let subscribers = match self.subscribers.read() {
            Ok(subscribers) => subscribers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for subscriber in subscribers {
            if let Err(error) = subscriber.handle(&event) {
                self.statistics.record_failure();
                warn!(
                    subscriber = subscriber.name(),
                    event = event.name,
                    task_id = event.task_id,
                    error = %error,
                    "Event subscriber failed; continuing"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSubscriber {
        seen: AtomicUsize,
    }

    impl EventSubscriber for CountingSubscriber {
        fn name(&self) -> &str {
            "counting"
        }

        fn handle(&self, _event: &OrchestrationEvent) -> anyhow::Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingSubscriber;

    impl EventSubscriber for FailingSubscriber {
        fn name(&self) -> &str {
            "failing"
        }

        fn handle(&self, _event: &OrchestrationEvent) -> anyhow::Result<()> {
            anyhow::bail!("subscriber exploded")
        }
    }

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let publisher = EventPublisher::new("X-Correlation-ID");
        let first = Arc::new(CountingSubscriber {
            seen: AtomicUsize::new(0),
        });
        let second = Arc::new(CountingSubscriber {
            seen: AtomicUsize::new(0),
        });
        publisher.subscribe(first.clone());
        publisher.subscribe(second.clone());

        publisher.publish(OrchestrationEvent::for_task(
            names::TASK_STARTED,
            1,
            Uuid::new_v4(),
        ));

        assert_eq!(first.seen.load(Ordering::SeqCst), 1);
        assert_eq!(second.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscriber_failure_does_not_stop_delivery() {
        let publisher = EventPublisher::new("X-Correlation-ID");
        let counting = Arc::new(CountingSubscriber {
            seen: AtomicUsize::new(0),
        });
        publisher.subscribe(Arc::new(FailingSubscriber));
        publisher.subscribe(counting.clone());

        publisher.publish(OrchestrationEvent::for_task(
            names::TASK_FAILED,
            1,
            Uuid::new_v4(),
        ));

        assert_eq!(counting.seen.load(Ordering::SeqCst), 1);
        assert_eq!(publisher.statistics().subscriber_failures(), 1);
    }

    #[test]
    fn test_statistics_count_by_name() {
        let publisher = EventPublisher::new("X-Correlation-ID");
        let correlation_id = Uuid::new_v4();
        publisher.publish(OrchestrationEvent::for_task(
            names::TASK_STARTED,
            1,
            correlation_id,
        ));
        publisher.publish(OrchestrationEvent::for_step(
            names::STEP_COMPLETED,
            1,
            10,
            correlation_id,
        ));
        publisher.publish(OrchestrationEvent::for_step(
            names::STEP_COMPLETED,
            1,
            11,
            correlation_id,
        ));

        let statistics = publisher.statistics();
        assert_eq!(statistics.events_published(), 3);
        assert_eq!(statistics.count_for(names::STEP_COMPLETED), 2);
        assert_eq!(statistics.count_for(names::TASK_STARTED), 1);
        assert_eq!(statistics.count_for(names::TASK_FAILED), 0);
    }

    #[test]
    fn test_correlation_id_injected_under_header_name() {
        struct CaptureSubscriber {
            captured: std::sync::Mutex<Option<Value>>,
        }

        impl EventSubscriber for CaptureSubscriber {
            fn name(&self) -> &str {
                "capture"
            }

            fn handle(&self, event: &OrchestrationEvent) -> anyhow::Result<()> {
                *self.captured.lock().unwrap() = Some(event.metadata.clone());
                Ok(())
            }
        }

        let publisher = EventPublisher::new("X-Request-ID");
        let capture = Arc::new(CaptureSubscriber {
            captured: std::sync::Mutex::new(None),
        });
        publisher.subscribe(capture.clone());

        let correlation_id = Uuid::new_v4();
        publisher.publish(OrchestrationEvent::for_task(
            names::TASK_STARTED,
            1,
            correlation_id,
        ));

        let metadata = capture.captured.lock().unwrap().clone().expect("captured");
        assert_eq!(metadata["X-Request-ID"], correlation_id.to_string());
    }
}
