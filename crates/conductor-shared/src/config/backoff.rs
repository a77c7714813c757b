//! Backoff configuration
//!
//! Controls the retry-delay curve for failed steps and the reenqueue delays
//! the finalizer attaches when a task goes back on the job queue.

use serde::{Deserialize, Serialize};

/// Per-execution-status reenqueue delays (seconds)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReenqueueDelays {
    #[serde(default = "ReenqueueDelays::default_has_ready_steps")]
    pub has_ready_steps: u32,
    #[serde(default = "ReenqueueDelays::default_waiting_for_dependencies")]
    pub waiting_for_dependencies: u32,
    #[serde(default = "ReenqueueDelays::default_processing")]
    pub processing: u32,
}

impl ReenqueueDelays {
    fn default_has_ready_steps() -> u32 {
        0
    }

    fn default_waiting_for_dependencies() -> u32 {
        45
    }

    fn default_processing() -> u32 {
        10
    }
}

impl Default for ReenqueueDelays {
    fn default() -> Self {
        Self {
            has_ready_steps: Self::default_has_ready_steps(),
            waiting_for_dependencies: Self::default_waiting_for_dependencies(),
            processing: Self::default_processing(),
        }
    }
}

/// Retry/backoff policy configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackoffConfig {
    /// Delay table for the first attempts; attempt N uses index N-1
    #[serde(default = "BackoffConfig::default_backoff_seconds_table")]
    pub default_backoff_seconds: Vec<u32>,
    /// Ceiling applied to every computed or server-supplied delay
    #[serde(default = "BackoffConfig::default_max_backoff_seconds")]
    pub max_backoff_seconds: u32,
    /// Exponent used once the delay table is exhausted: floor(N ^ multiplier)
    #[serde(default = "BackoffConfig::default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "BackoffConfig::default_jitter_enabled")]
    pub jitter_enabled: bool,
    /// Jitter amplitude as a fraction of the capped delay
    #[serde(default = "BackoffConfig::default_jitter_max_percentage")]
    pub jitter_max_percentage: f64,
    #[serde(default)]
    pub reenqueue_delays: ReenqueueDelays,
    /// Fallback reenqueue delay for statuses without an entry
    #[serde(default = "BackoffConfig::default_reenqueue_delay")]
    pub default_reenqueue_delay: u32,
    /// Safety margin added to every reenqueue delay
    #[serde(default = "BackoffConfig::default_buffer_seconds")]
    pub buffer_seconds: u32,
}

impl BackoffConfig {
    fn default_backoff_seconds_table() -> Vec<u32> {
        vec![1, 2, 4, 8, 16, 32]
    }

    fn default_max_backoff_seconds() -> u32 {
        300
    }

    fn default_backoff_multiplier() -> f64 {
        2.0
    }

    fn default_jitter_enabled() -> bool {
        true
    }

    fn default_jitter_max_percentage() -> f64 {
        0.10
    }

    fn default_reenqueue_delay() -> u32 {
        30
    }

    fn default_buffer_seconds() -> u32 {
        5
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            default_backoff_seconds: Self::default_backoff_seconds_table(),
            max_backoff_seconds: Self::default_max_backoff_seconds(),
            backoff_multiplier: Self::default_backoff_multiplier(),
            jitter_enabled: Self::default_jitter_enabled(),
            jitter_max_percentage: Self::default_jitter_max_percentage(),
            reenqueue_delays: ReenqueueDelays::default(),
            default_reenqueue_delay: Self::default_reenqueue_delay(),
            buffer_seconds: Self::default_buffer_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_defaults_match_policy() {
        let config = BackoffConfig::default();
        assert_eq!(config.default_backoff_seconds, vec![1, 2, 4, 8, 16, 32]);
        assert_eq!(config.max_backoff_seconds, 300);
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
        assert!(config.jitter_enabled);
        assert!((config.jitter_max_percentage - 0.10).abs() < f64::EPSILON);
        assert_eq!(config.default_reenqueue_delay, 30);
        assert_eq!(config.buffer_seconds, 5);
    }

    #[test]
    fn test_reenqueue_delay_defaults() {
        let delays = ReenqueueDelays::default();
        assert_eq!(delays.has_ready_steps, 0);
        assert_eq!(delays.waiting_for_dependencies, 45);
        assert_eq!(delays.processing, 10);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: BackoffConfig =
            toml::from_str("max_backoff_seconds = 120\n").expect("parse");
        assert_eq!(config.max_backoff_seconds, 120);
        assert_eq!(config.default_backoff_seconds, vec![1, 2, 4, 8, 16, 32]);
        assert_eq!(config.reenqueue_delays.waiting_for_dependencies, 45);
    }
}
