use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_EVICTION_INTERVAL_SECS: u64 = 60;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How often finished requests past their retention are evicted
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_seconds: u64,
}

const fn default_eviction_interval() -> u64 {
    DEFAULT_EVICTION_INTERVAL_SECS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            eviction_interval_seconds: DEFAULT_EVICTION_INTERVAL_SECS,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("TABLINK_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            port: std::env::var("TABLINK_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            eviction_interval_seconds: std::env::var("TABLINK_EVICTION_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_EVICTION_INTERVAL_SECS),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub const fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_seconds)
    }
}
