use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where per-user slots are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotBackend {
    /// Per-process map.
    #[default]
    Memory,
    /// SQLite file shared by every process using the same path.
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Uploads a normal user may start per period.
    #[serde(default = "default_uploads_per_period")]
    pub uploads_per_period: u32,
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    /// Spacing between uploads of privileged users.
    #[serde(default)]
    pub privileged_spacing_ms: u64,
    #[serde(default = "default_privileged_groups")]
    pub privileged_groups: Vec<String>,
    /// Idle slots are forgotten after this long.
    #[serde(default = "default_slot_ttl")]
    pub slot_ttl_secs: u64,
    /// How long a user's classification is reused.
    #[serde(default = "default_classification_cache")]
    pub classification_cache_secs: u64,
    #[serde(default)]
    pub backend: SlotBackend,
    /// Database file for the sqlite backend. Defaults to the main database.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_uploads_per_period() -> u32 {
    4
}

fn default_period_secs() -> u64 {
    60
}

fn default_privileged_groups() -> Vec<String> {
    vec!["patroller".to_string(), "sysop".to_string()]
}

fn default_slot_ttl() -> u64 {
    3600
}

fn default_classification_cache() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            uploads_per_period: default_uploads_per_period(),
            period_secs: default_period_secs(),
            privileged_spacing_ms: 0,
            privileged_groups: default_privileged_groups(),
            slot_ttl_secs: default_slot_ttl(),
            classification_cache_secs: default_classification_cache(),
            backend: SlotBackend::Memory,
            path: None,
        }
    }
}
