//! Task request ingress scenarios: duplicate detection, unknown templates,
//! payload validation, and identity-hash persistence.

mod common;

use std::sync::Arc;

use conductor_shared::errors::ConductorError;
use conductor_shared::models::core::Task;

use common::*;

/// The same request twice inside the window: the second submission fails
/// with DuplicateTask and only one task row exists.
#[sqlx::test(migrator = "conductor_shared::database::migrator::MIGRATOR")]
async fn test_duplicate_submission_rejected(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let harness = TestHarness::new(pool.clone()).await;
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    register_linear_workflow(&harness, order).await;

    let request = request_for("linear_chain");
    let first = harness
        .processor
        .process_task_request(request.clone())
        .await?;

    let error = harness
        .processor
        .process_task_request(request)
        .await
        .unwrap_err();
    assert!(matches!(error, ConductorError::DuplicateTask { .. }));

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks")
        .fetch_one(&pool)
        .await?;
    assert_eq!(count.0, 1, "only the first submission creates a row");

    // the surviving row carries the request's identity hash
    let task = Task::find_by_id(&pool, first.task_id).await?.unwrap();
    assert_eq!(task.identity_hash.len(), 64);

    Ok(())
}

/// Different contexts produce different identity hashes, so both requests
/// are accepted.
#[sqlx::test(migrator = "conductor_shared::database::migrator::MIGRATOR")]
async fn test_distinct_contexts_both_accepted(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let harness = TestHarness::new(pool.clone()).await;
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    register_linear_workflow(&harness, order).await;

    harness
        .processor
        .process_task_request(request_for("linear_chain"))
        .await?;
    harness
        .processor
        .process_task_request(request_for("linear_chain"))
        .await?;

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks")
        .fetch_one(&pool)
        .await?;
    assert_eq!(count.0, 2);

    Ok(())
}

/// Requests naming an unregistered template fail with UnknownTask
#[sqlx::test(migrator = "conductor_shared::database::migrator::MIGRATOR")]
async fn test_unknown_task_rejected(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let harness = TestHarness::new(pool).await;

    let error = harness
        .processor
        .process_task_request(request_for("never_registered"))
        .await
        .unwrap_err();
    assert!(matches!(error, ConductorError::UnknownTask { .. }));

    Ok(())
}

/// Requests failing payload validation never reach the initializer
#[sqlx::test(migrator = "conductor_shared::database::migrator::MIGRATOR")]
async fn test_invalid_payload_rejected(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let harness = TestHarness::new(pool.clone()).await;
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    register_linear_workflow(&harness, order).await;

    let mut request = request_for("linear_chain");
    request.name = String::new();

    let error = harness
        .processor
        .process_task_request(request)
        .await
        .unwrap_err();
    assert!(matches!(error, ConductorError::Validation(_)));

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks")
        .fetch_one(&pool)
        .await?;
    assert_eq!(count.0, 0);

    Ok(())
}

/// Templates whose handlers are missing fail task creation, not execution
#[sqlx::test(migrator = "conductor_shared::database::migrator::MIGRATOR")]
async fn test_missing_handler_fails_creation(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let harness = TestHarness::new(pool.clone()).await;

    let template = conductor_shared::registry::TaskTemplate::new("test", "handlerless", "1.0.0")
        .with_step(conductor_shared::registry::StepTemplate::new(
            "orphan",
            "test.unregistered_handler",
        ));
    harness.template_registry.register(template).await?;

    let error = harness
        .processor
        .process_task_request(request_for("handlerless"))
        .await
        .unwrap_err();
    assert!(matches!(error, ConductorError::Configuration(_)));
    assert!(error.to_string().contains("unregistered_handler"));

    Ok(())
}
