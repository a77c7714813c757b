//! Embedded migrations.
//!
//! `MIGRATOR` is consumed by `#[sqlx::test(migrator = ...)]` and by process
//! boot (`run_migrations`).

use sqlx::migrate::Migrator;
use sqlx::PgPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply pending migrations at process start
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}
