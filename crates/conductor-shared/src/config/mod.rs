//! # Conductor Configuration
//!
//! Configuration types for the orchestration system.
//!
//! ## Structure
//!
//! ```text
//! config/
//! ├── mod.rs        # ConductorConfig + loading
//! ├── backoff.rs    # BackoffConfig
//! ├── cache.rs      # CacheConfig
//! ├── database.rs   # DatabaseConfig
//! ├── execution.rs  # ExecutionConfig
//! └── telemetry.rs  # TelemetryConfig
//! ```
//!
//! ## Loading
//!
//! Configuration is loaded from an optional TOML file named by
//! `CONDUCTOR_CONFIG_PATH`, then overlaid with `CONDUCTOR__`-prefixed
//! environment variables (e.g. `CONDUCTOR__DATABASE__MAX_CONNECTIONS=20`).
//! Every field has a default, so an empty environment produces a usable
//! configuration. The configuration value is constructed once at process
//! start and never mutated after boot.

use serde::{Deserialize, Serialize};

pub mod backoff;
pub use backoff::BackoffConfig;
pub mod cache;
pub use cache::CacheConfig;
pub mod database;
pub use database::DatabaseConfig;
pub mod execution;
pub use execution::ExecutionConfig;
pub mod telemetry;
pub use telemetry::TelemetryConfig;

use crate::errors::{ConductorError, ConductorResult};

/// Engine-level settings that don't belong to a single component
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Window inside which a matching identity hash rejects a new task
    #[serde(default = "EngineConfig::default_duplicate_window_seconds")]
    pub duplicate_window_seconds: i64,
    /// Dependent system assigned to steps that don't declare one
    #[serde(default = "EngineConfig::default_dependent_system")]
    pub default_dependent_system: String,
}

impl EngineConfig {
    fn default_duplicate_window_seconds() -> i64 {
        60
    }

    fn default_dependent_system() -> String {
        "unknown".to_string()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            duplicate_window_seconds: Self::default_duplicate_window_seconds(),
            default_dependent_system: Self::default_dependent_system(),
        }
    }
}

/// Root configuration for the conductor system
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConductorConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl ConductorConfig {
    /// Load configuration from the optional file named by
    /// `CONDUCTOR_CONFIG_PATH` plus `CONDUCTOR__`-prefixed environment
    /// overrides.
    pub fn load() -> ConductorResult<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var("CONDUCTOR_CONFIG_PATH") {
            builder = builder.add_source(config::File::with_name(&path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CONDUCTOR")
                .separator("__")
                .try_parsing(true),
        );

        let loaded = builder
            .build()
            .map_err(|e| ConductorError::Configuration(format!("config build failed: {e}")))?;

        let mut parsed: ConductorConfig = loaded
            .try_deserialize()
            .map_err(|e| ConductorError::Configuration(format!("config parse failed: {e}")))?;

        // CORRELATION_ID_HEADER is honored without the CONDUCTOR prefix for
        // compatibility with the rest of the platform.
        if let Ok(header) = std::env::var("CORRELATION_ID_HEADER") {
            if !header.is_empty() {
                parsed.telemetry.correlation_id_header = header;
            }
        }

        parsed.validate()?;
        Ok(parsed)
    }

    /// Reject configurations that cannot drive the orchestration loop
    pub fn validate(&self) -> ConductorResult<()> {
        if self.backoff.default_backoff_seconds.is_empty() {
            return Err(ConductorError::Configuration(
                "backoff.default_backoff_seconds must not be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter_max_percentage) {
            return Err(ConductorError::Configuration(format!(
                "backoff.jitter_max_percentage must be within [0.0, 1.0], got {}",
                self.backoff.jitter_max_percentage
            )));
        }
        if self.execution.min_concurrent_steps > self.execution.max_concurrent_steps_limit {
            return Err(ConductorError::Configuration(format!(
                "execution.min_concurrent_steps ({}) exceeds max_concurrent_steps_limit ({})",
                self.execution.min_concurrent_steps, self.execution.max_concurrent_steps_limit
            )));
        }
        if self.cache.min_ttl_seconds > self.cache.max_ttl_seconds {
            return Err(ConductorError::Configuration(format!(
                "cache.min_ttl_seconds ({}) exceeds max_ttl_seconds ({})",
                self.cache.min_ttl_seconds, self.cache.max_ttl_seconds
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ConductorConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_engine_defaults() {
        let engine = EngineConfig::default();
        assert_eq!(engine.duplicate_window_seconds, 60);
        assert_eq!(engine.default_dependent_system, "unknown");
    }

    #[test]
    fn test_validate_rejects_empty_backoff_table() {
        let mut config = ConductorConfig::default();
        config.backoff.default_backoff_seconds.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_jitter() {
        let mut config = ConductorConfig::default();
        config.backoff.jitter_max_percentage = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_concurrency_bounds() {
        let mut config = ConductorConfig::default();
        config.execution.min_concurrent_steps = 20;
        config.execution.max_concurrent_steps_limit = 12;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = ConductorConfig::default();
        let rendered = toml::to_string(&config).expect("serialize");
        let parsed: ConductorConfig = toml::from_str(&rendered).expect("parse");
        assert_eq!(
            parsed.backoff.default_backoff_seconds,
            config.backoff.default_backoff_seconds
        );
        assert_eq!(
            parsed.telemetry.correlation_id_header,
            config.telemetry.correlation_id_header
        );
    }
}
