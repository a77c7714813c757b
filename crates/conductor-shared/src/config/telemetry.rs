//! Telemetry configuration
//!
//! The core emits structured tracing and event-bus notifications; exporting
//! to metrics backends is a subscriber concern outside this crate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Gates the built-in log subscriber on the event bus
    #[serde(default = "TelemetryConfig::default_enabled")]
    pub enabled: bool,
    /// Header/metadata key carrying the correlation id across boundaries
    #[serde(default = "TelemetryConfig::default_correlation_id_header")]
    pub correlation_id_header: String,
}

impl TelemetryConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_correlation_id_header() -> String {
        "X-Correlation-ID".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            correlation_id_header: Self::default_correlation_id_header(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_defaults() {
        let config = TelemetryConfig::default();
        assert!(config.enabled);
        assert_eq!(config.correlation_id_header, "X-Correlation-ID");
    }
}
