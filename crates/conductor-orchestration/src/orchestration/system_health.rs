//! # Concurrency Governor
//!
//! Derives the step executor's dynamic concurrency cap from database pool
//! headroom and system-wide load gauges, memoized per process so the
//! readiness path doesn't hammer the counters query.

use moka::sync::Cache;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, warn};

use conductor_shared::config::ExecutionConfig;
use conductor_shared::database::{SqlFunctionExecutor, SystemHealthCounts};

/// Load classification feeding the pressure factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemPressure {
    Low,
    Moderate,
    High,
    Critical,
}

/// Inputs to the cap calculation
#[derive(Debug, Clone, Copy)]
pub struct SystemLoad {
    pub pool_size: u32,
    pub active_connections: u32,
    pub in_progress_tasks: i64,
    pub in_progress_steps: i64,
}

impl SystemLoad {
    /// Worst of connection utilization and step load (each in-process step
    /// will shortly want a connection).
    fn utilization(&self) -> f64 {
        let pool = self.pool_size.max(1) as f64;
        let connection_utilization = self.active_connections as f64 / pool;
        let step_utilization = self.in_progress_steps.max(0) as f64 / pool;
        connection_utilization.max(step_utilization)
    }

    pub fn pressure(&self) -> SystemPressure {
        let utilization = self.utilization();
        if utilization < 0.5 {
            SystemPressure::Low
        } else if utilization < 0.7 {
            SystemPressure::Moderate
        } else if utilization < 0.85 {
            SystemPressure::High
        } else {
            SystemPressure::Critical
        }
    }
}

/// Pure cap calculation: `clamp(floor(available * factor), min, max)`
pub fn concurrency_cap(load: &SystemLoad, config: &ExecutionConfig) -> usize {
    let factors = &config.pressure_factors;
    let factor = match load.pressure() {
        SystemPressure::Low => factors.low,
        SystemPressure::Moderate => factors.moderate,
        SystemPressure::High => factors.high,
        SystemPressure::Critical => factors.critical,
    };
    let available = load.pool_size.saturating_sub(load.active_connections) as f64;
    let raw = (available * factor).floor() as usize;
    raw.clamp(config.min_concurrent_steps, config.max_concurrent_steps_limit)
}

pub struct ConcurrencyGovernor {
    sql_executor: SqlFunctionExecutor,
    pool: PgPool,
    config: ExecutionConfig,
    /// Pool ceiling from configuration (the pool itself only reports current
    /// connections)
    max_connections: u32,
    memo: Cache<&'static str, usize>,
}

impl std::fmt::Debug for ConcurrencyGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyGovernor")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl ConcurrencyGovernor {
    pub fn new(pool: PgPool, config: ExecutionConfig, max_connections: u32) -> Self {
        let memo = Cache::builder()
            .max_capacity(4)
            .time_to_live(Duration::from_secs(config.concurrency_cache_duration_seconds))
            .build();
        Self {
            sql_executor: SqlFunctionExecutor::new(pool.clone()),
            pool,
            config,
            max_connections,
            memo,
        }
    }

    /// Concurrency cap for the next batch, memoized for the configured
    /// duration. Falls back to the floor when the gauges are unavailable.
    pub async fn current_cap(&self) -> usize {
        if let Some(cap) = self.memo.get("cap") {
            return cap;
        }

        let cap = match self.sql_executor.get_system_health_counts().await {
            Ok(counts) => {
                let load = self.load_from(&counts);
                let cap = concurrency_cap(&load, &self.config);
                debug!(
                    pool_size = load.pool_size,
                    active_connections = load.active_connections,
                    in_progress_steps = load.in_progress_steps,
                    pressure = ?load.pressure(),
                    cap = cap,
                    "Computed concurrency cap"
                );
                cap
            }
            Err(error) => {
                warn!(
                    error = %error,
                    fallback = self.config.min_concurrent_steps,
                    "System health query failed; using minimum concurrency"
                );
                self.config.min_concurrent_steps
            }
        };

        self.memo.insert("cap", cap);
        cap
    }

    fn load_from(&self, counts: &SystemHealthCounts) -> SystemLoad {
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        SystemLoad {
            pool_size: self.max_connections,
            active_connections: size.saturating_sub(idle),
            in_progress_tasks: counts.in_progress_tasks,
            in_progress_steps: counts.in_progress_steps,
        }
    }
}
