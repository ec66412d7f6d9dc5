//! Metrics exporter configuration.

use serde::{Deserialize, Serialize};

/// Prometheus exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the Prometheus HTTP listener is started.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Socket address of the scrape endpoint.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_listen_addr() -> String {
    "0.0.0.0:9090".to_string()
}
