//! Execution configuration
//!
//! Concurrency bounds and timeouts for the step executor.

use serde::{Deserialize, Serialize};

/// Fractions of pool headroom granted to one batch at each pressure level
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PressureFactors {
    #[serde(default = "PressureFactors::default_low")]
    pub low: f64,
    #[serde(default = "PressureFactors::default_moderate")]
    pub moderate: f64,
    #[serde(default = "PressureFactors::default_high")]
    pub high: f64,
    #[serde(default = "PressureFactors::default_critical")]
    pub critical: f64,
}

impl PressureFactors {
    fn default_low() -> f64 {
        0.8
    }

    fn default_moderate() -> f64 {
        0.6
    }

    fn default_high() -> f64 {
        0.4
    }

    fn default_critical() -> f64 {
        0.2
    }
}

impl Default for PressureFactors {
    fn default() -> Self {
        Self {
            low: Self::default_low(),
            moderate: Self::default_moderate(),
            high: Self::default_high(),
            critical: Self::default_critical(),
        }
    }
}

/// Step executor concurrency and timeout configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Floor for the dynamic concurrency cap
    #[serde(default = "ExecutionConfig::default_min_concurrent_steps")]
    pub min_concurrent_steps: usize,
    /// Ceiling for the dynamic concurrency cap
    #[serde(default = "ExecutionConfig::default_max_concurrent_steps_limit")]
    pub max_concurrent_steps_limit: usize,
    #[serde(default)]
    pub pressure_factors: PressureFactors,
    /// How long one computed concurrency cap is reused before recomputation
    #[serde(default = "ExecutionConfig::default_concurrency_cache_duration_seconds")]
    pub concurrency_cache_duration_seconds: u64,
    /// Base of the per-batch timeout formula
    #[serde(default = "ExecutionConfig::default_base_batch_timeout_seconds")]
    pub base_batch_timeout_seconds: u64,
    /// Per-step increment of the per-batch timeout formula
    #[serde(default = "ExecutionConfig::default_per_step_timeout_seconds")]
    pub per_step_timeout_seconds: u64,
    /// Hard cap on the per-batch timeout
    #[serde(default = "ExecutionConfig::default_max_batch_timeout_seconds")]
    pub max_batch_timeout_seconds: u64,
}

impl ExecutionConfig {
    fn default_min_concurrent_steps() -> usize {
        3
    }

    fn default_max_concurrent_steps_limit() -> usize {
        12
    }

    fn default_concurrency_cache_duration_seconds() -> u64 {
        30
    }

    fn default_base_batch_timeout_seconds() -> u64 {
        30
    }

    fn default_per_step_timeout_seconds() -> u64 {
        5
    }

    fn default_max_batch_timeout_seconds() -> u64 {
        120
    }

    /// Batch timeout: min(max, base + batch_size * per_step)
    pub fn batch_timeout_seconds(&self, batch_size: usize) -> u64 {
        let scaled = self.base_batch_timeout_seconds
            + (batch_size as u64) * self.per_step_timeout_seconds;
        scaled.min(self.max_batch_timeout_seconds)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            min_concurrent_steps: Self::default_min_concurrent_steps(),
            max_concurrent_steps_limit: Self::default_max_concurrent_steps_limit(),
            pressure_factors: PressureFactors::default(),
            concurrency_cache_duration_seconds: Self::default_concurrency_cache_duration_seconds(),
            base_batch_timeout_seconds: Self::default_base_batch_timeout_seconds(),
            per_step_timeout_seconds: Self::default_per_step_timeout_seconds(),
            max_batch_timeout_seconds: Self::default_max_batch_timeout_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_defaults() {
        let config = ExecutionConfig::default();
        assert_eq!(config.min_concurrent_steps, 3);
        assert_eq!(config.max_concurrent_steps_limit, 12);
        assert_eq!(config.concurrency_cache_duration_seconds, 30);
    }

    #[test]
    fn test_pressure_factor_defaults() {
        let factors = PressureFactors::default();
        assert!((factors.low - 0.8).abs() < f64::EPSILON);
        assert!((factors.moderate - 0.6).abs() < f64::EPSILON);
        assert!((factors.high - 0.4).abs() < f64::EPSILON);
        assert!((factors.critical - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_batch_timeout_scales_with_batch_size() {
        let config = ExecutionConfig::default();
        assert_eq!(config.batch_timeout_seconds(1), 35);
        assert_eq!(config.batch_timeout_seconds(4), 50);
    }

    #[test]
    fn test_batch_timeout_is_capped() {
        let config = ExecutionConfig::default();
        // 30 + 5 * 100 = 530, capped at 120
        assert_eq!(config.batch_timeout_seconds(100), 120);
    }
}
