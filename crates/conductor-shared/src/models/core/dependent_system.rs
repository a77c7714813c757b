//! Dependent system models.
//!
//! A dependent system is the external collaborator a named step talks to
//! (an HTTP API, a database, an internal service). Object maps record id
//! correspondence between two systems.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DependentSystem {
    pub dependent_system_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl DependentSystem {
    pub async fn find_or_create(pool: &PgPool, name: &str) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, DependentSystem>(
            "INSERT INTO dependent_systems (name, created_at, updated_at) \
             VALUES ($1, NOW(), NOW()) \
             ON CONFLICT (name) DO UPDATE SET updated_at = NOW() \
             RETURNING *",
        )
        .bind(name)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, DependentSystem>("SELECT * FROM dependent_systems WHERE name = $1")
            .bind(name)
            .fetch_optional(pool)
            .await
    }
}

/// Id correspondence between objects of two dependent systems
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DependentSystemObjectMap {
    pub dependent_system_object_map_id: i64,
    pub dependent_system_one_id: i64,
    pub dependent_system_two_id: i64,
    pub remote_id_one: String,
    pub remote_id_two: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl DependentSystemObjectMap {
    pub async fn find_or_create(
        pool: &PgPool,
        system_one_id: i64,
        system_two_id: i64,
        remote_id_one: &str,
        remote_id_two: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, DependentSystemObjectMap>(
            "INSERT INTO dependent_system_object_maps \
             (dependent_system_one_id, dependent_system_two_id, remote_id_one, remote_id_two, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, NOW(), NOW()) \
             ON CONFLICT (dependent_system_one_id, dependent_system_two_id, remote_id_one, remote_id_two) \
             DO UPDATE SET updated_at = NOW() \
             RETURNING *",
        )
        .bind(system_one_id)
        .bind(system_two_id)
        .bind(remote_id_one)
        .bind(remote_id_two)
        .fetch_one(pool)
        .await
    }
}
