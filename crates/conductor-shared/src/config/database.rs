//! Database configuration

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::errors::{ConductorError, ConductorResult};

/// Connection pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Connection string; `DATABASE_URL` wins when set
    #[serde(default = "DatabaseConfig::default_url")]
    pub url: String,
    #[serde(default = "DatabaseConfig::default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "DatabaseConfig::default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "DatabaseConfig::default_acquire_timeout_seconds")]
    pub acquire_timeout_seconds: u64,
    #[serde(default = "DatabaseConfig::default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
}

impl DatabaseConfig {
    fn default_url() -> String {
        "postgres://localhost/conductor_development".to_string()
    }

    fn default_max_connections() -> u32 {
        10
    }

    fn default_min_connections() -> u32 {
        1
    }

    fn default_acquire_timeout_seconds() -> u64 {
        30
    }

    fn default_idle_timeout_seconds() -> u64 {
        600
    }

    /// Resolved connection string (environment wins over file)
    pub fn resolved_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.url.clone())
    }

    /// Build a connection pool from this configuration
    pub async fn connect(&self) -> ConductorResult<PgPool> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_seconds))
            .idle_timeout(Duration::from_secs(self.idle_timeout_seconds))
            .connect(&self.resolved_url())
            .await
            .map_err(|e| ConductorError::Database {
                operation: "pool_connect".to_string(),
                reason: e.to_string(),
            })
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            max_connections: Self::default_max_connections(),
            min_connections: Self::default_min_connections(),
            acquire_timeout_seconds: Self::default_acquire_timeout_seconds(),
            idle_timeout_seconds: Self::default_idle_timeout_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_defaults() {
        let config = DatabaseConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.acquire_timeout_seconds, 30);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: DatabaseConfig = toml::from_str("max_connections = 25\n").expect("parse");
        assert_eq!(config.max_connections, 25);
        assert_eq!(config.min_connections, 1);
    }
}
