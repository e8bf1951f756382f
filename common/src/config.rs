use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// Stays under the 15 s watchdog timeout.
const MAX_FAULT_GRACE_MS: u64 = 14_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub measurement_period_ms: u64,
    pub watchdog_feed_interval_ms: u64,
    pub liveness_interval_ms: u64,
    pub readiness_poll_ms: u64,
    pub fault_grace_ms: u64,
    pub http_timeout_ms: Option<u64>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            measurement_period_ms: 30_000,
            watchdog_feed_interval_ms: 1_000,
            liveness_interval_ms: 250,
            readiness_poll_ms: 100,
            fault_grace_ms: 10_000,
            http_timeout_ms: None,
        }
    }
}

impl TimingConfig {
    pub fn sanitize(&mut self) {
        self.watchdog_feed_interval_ms = self.watchdog_feed_interval_ms.clamp(100, 5_000);
        self.measurement_period_ms = self.measurement_period_ms.max(1_000);
        self.liveness_interval_ms = self.liveness_interval_ms.clamp(100, 250);
        self.readiness_poll_ms = self.readiness_poll_ms.clamp(10, 1_000);
        self.fault_grace_ms = self.fault_grace_ms.min(MAX_FAULT_GRACE_MS);
        self.http_timeout_ms = self.http_timeout_ms.map(|ms| ms.max(100));
    }

    pub fn measurement_period(&self) -> Duration {
        Duration::from_millis(self.measurement_period_ms)
    }

    pub fn watchdog_feed_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_feed_interval_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn readiness_poll(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_ms)
    }

    pub fn fault_grace(&self) -> Duration {
        Duration::from_millis(self.fault_grace_ms)
    }

    pub fn http_timeout(&self) -> Option<Duration> {
        self.http_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub wifi_ssid: String,
    pub wifi_key: String,
    pub ha_host: String,
    pub ha_port: u16,
    #[serde(default)]
    pub ha_ssl: bool,
    #[serde(default)]
    pub ha_token: Option<String>,
    #[serde(default)]
    pub timing: TimingConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_key: String::new(),
            ha_host: "homeassistant.local".to_string(),
            ha_port: 8123,
            ha_ssl: false,
            ha_token: None,
            timing: TimingConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        config.timing.sanitize();
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ha_host.trim().is_empty() {
            return Err(ConfigError::Invalid("ha_host must not be empty"));
        }
        if self.ha_port == 0 {
            return Err(ConfigError::Invalid("ha_port must not be zero"));
        }
        Ok(())
    }

    pub fn hub(&self) -> HubConfig {
        HubConfig {
            host: self.ha_host.trim().to_string(),
            port: self.ha_port,
            use_tls: self.ha_ssl,
            token: self.ha_token.clone().filter(|token| !token.is_empty()),
        }
    }
}
