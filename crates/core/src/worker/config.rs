//! Worker pool configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the background upload workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Enable/disable the workers.
    /// When disabled, dispatched tasks stay queued until another process runs them.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Workers pulling from the privileged lane.
    #[serde(default = "default_privileged")]
    pub privileged: usize,

    /// Workers pulling from the normal lane.
    #[serde(default = "default_normal")]
    pub normal: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_privileged() -> usize {
    2
}

fn default_normal() -> usize {
    4
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            privileged: default_privileged(),
            normal: default_normal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.privileged, 2);
        assert_eq!(config.normal, 4);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: WorkerConfig = toml::from_str("normal = 8").unwrap();
        assert!(config.enabled);
        assert_eq!(config.privileged, 2);
        assert_eq!(config.normal, 8);
    }
}
