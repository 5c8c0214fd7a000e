use super::types::{LockSection, LoggingSection, MonitorSection};
use serde::{Deserialize, Serialize};

/// Configuration for the prism-gateway binary.
///
/// Represents `prism-gateway.yaml`. Every field has a default and unknown
/// fields are ignored, so an empty file is a valid config.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub lock: LockSection,
    pub monitor: MonitorSection,
    pub logging: LoggingSection,
}
