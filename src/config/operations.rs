//! Config loading, validation, and conversion into runtime options.

use super::model::Config;
use super::types::DEFAULT_CONFIG_FILE;
use crate::error::{GatewayError, Result};
use crate::locks::LockOptions;
use crate::monitor::MonitorOptions;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::ConfigError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Resolve the config for a run.
    ///
    /// An explicit path must exist. Without one, `prism-gateway.yaml` in the
    /// working directory is used when present, defaults otherwise.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::load(path)
                } else {
                    debug!("no config file found; using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| GatewayError::ConfigError(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            GatewayError::ConfigError(format!("failed to serialize config to YAML: {}", e))
        })
    }

    /// Validate config values.
    ///
    /// Intervals and timeouts used as periods must be non-zero and the
    /// history must hold at least one event. `lock.timeout_ms` may be zero
    /// (single attempt).
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("lock.retry_interval_ms", self.lock.retry_interval_ms),
            ("lock.stale_timeout_ms", self.lock.stale_timeout_ms),
            ("monitor.scan_interval_ms", self.monitor.scan_interval_ms),
            ("monitor.stale_timeout_ms", self.monitor.stale_timeout_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(GatewayError::ConfigError(format!(
                    "config validation failed: {} must be greater than 0",
                    field
                )));
            }
        }

        if self.monitor.max_history_records == 0 {
            return Err(GatewayError::ConfigError(
                "config validation failed: monitor.max_history_records must be at least 1"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Options for locks created by the binary.
    pub fn lock_options(&self) -> LockOptions {
        LockOptions::default()
            .with_timeout(Duration::from_millis(self.lock.timeout_ms))
            .with_retry_interval(Duration::from_millis(self.lock.retry_interval_ms))
            .with_stale_timeout(Duration::from_millis(self.lock.stale_timeout_ms))
            .with_auto_cleanup(self.lock.auto_cleanup)
    }

    /// Options for the lock monitor.
    pub fn monitor_options(&self) -> MonitorOptions {
        let mut options = MonitorOptions::default()
            .with_scan_interval(Duration::from_millis(self.monitor.scan_interval_ms))
            .with_stale_timeout(Duration::from_millis(self.monitor.stale_timeout_ms))
            .with_auto_cleanup(self.monitor.auto_cleanup)
            .with_max_history_records(self.monitor.max_history_records);
        if let Some(log) = &self.monitor.audit_log {
            options = options.with_audit_log(log);
        }
        options
    }
}
