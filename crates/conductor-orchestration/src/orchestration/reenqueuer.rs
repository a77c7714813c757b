//! # Reenqueuer
//!
//! Thin adapter over the host job system: put a task back on the queue
//! after an optional delay. Collapsing duplicate enqueues for the same
//! `(task, earliest run time)` into one execution is the host system's
//! job; the in-process adapter honors the same contract for tests and
//! single-process deployments.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Timelike};
use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use conductor_shared::errors::{OrchestrationError, OrchestrationResult};

/// A task due for another orchestration cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReenqueuedTask {
    pub task_id: i64,
    pub not_before: NaiveDateTime,
}

#[async_trait]
pub trait TaskReenqueuer: Send + Sync {
    /// Schedule another cycle for `task_id` after `delay`. Idempotent per
    /// `(task_id, earliest allowed run time)`.
    async fn enqueue(&self, task_id: i64, delay: Duration) -> OrchestrationResult<()>;
}

/// In-process queue backed by a tokio channel with delayed delivery
#[derive(Debug)]
pub struct InProcessReenqueuer {
    sender: mpsc::UnboundedSender<ReenqueuedTask>,
    /// Pending (task, not-before) pairs, for duplicate collapsing
    pending: DashMap<(i64, NaiveDateTime), ()>,
}

impl InProcessReenqueuer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReenqueuedTask>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                pending: DashMap::new(),
            },
            receiver,
        )
    }
}

#[async_trait]
impl TaskReenqueuer for InProcessReenqueuer {
    async fn enqueue(&self, task_id: i64, delay: Duration) -> OrchestrationResult<()> {
        let not_before = chrono::Utc::now().naive_utc()
            + chrono::Duration::seconds(delay.as_secs() as i64);
        // collapse to second resolution for the idempotency key
        let key_time = not_before.with_nanosecond(0).unwrap_or(not_before);

        if self.pending.insert((task_id, key_time), ()).is_some() {
            debug!(
                task_id = task_id,
                "Duplicate reenqueue collapsed"
            );
            return Ok(());
        }

        let sender = self.sender.clone();
        let item = ReenqueuedTask {
            task_id,
            not_before,
        };
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            // receiver dropped means the process is shutting down
            let _ = sender.send(item);
        });

        debug!(
            task_id = task_id,
            delay_seconds = delay.as_secs(),
            "Task reenqueued"
        );
        Ok(())
    }
}

/// Adapter that rejects every enqueue; for callers that require a terminal
/// cycle (one-shot execution).
#[derive(Debug, Default)]
pub struct RejectingReenqueuer;

#[async_trait]
impl TaskReenqueuer for RejectingReenqueuer {
    async fn enqueue(&self, task_id: i64, _delay: Duration) -> OrchestrationResult<()> {
        Err(OrchestrationError::ReenqueueFailed {
            task_id,
            reason: "reenqueue disabled for one-shot execution".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_delivers_after_delay() {
        let (reenqueuer, mut receiver) = InProcessReenqueuer::new();
        reenqueuer
            .enqueue(42, Duration::from_millis(10))
            .await
            .expect("enqueue");

        let delivered = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("delivery within a second")
            .expect("channel open");
        assert_eq!(delivered.task_id, 42);
    }

    #[tokio::test]
    async fn test_duplicate_enqueues_collapse() {
        let (reenqueuer, mut receiver) = InProcessReenqueuer::new();
        // same task, same delay, same second: one delivery
        reenqueuer.enqueue(7, Duration::ZERO).await.expect("first");
        reenqueuer.enqueue(7, Duration::ZERO).await.expect("second");

        let first = tokio::time::timeout(Duration::from_millis(200), receiver.recv())
            .await
            .expect("first delivery")
            .expect("channel open");
        assert_eq!(first.task_id, 7);

        let second = tokio::time::timeout(Duration::from_millis(200), receiver.recv()).await;
        assert!(second.is_err(), "duplicate should not be delivered");
    }

    #[tokio::test]
    async fn test_rejecting_reenqueuer_errors() {
        let reenqueuer = RejectingReenqueuer;
        let result = reenqueuer.enqueue(1, Duration::ZERO).await;
        assert!(matches!(
            result,
            Err(OrchestrationError::ReenqueueFailed { task_id: 1, .. })
        ));
    }
}
