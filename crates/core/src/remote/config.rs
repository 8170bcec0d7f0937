//! Remote repository client configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Action API endpoint.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Base URL used to build links to file pages.
    #[serde(default = "default_site_url")]
    pub site_url: String,
    /// Site id used for structured metadata lookups and edits.
    #[serde(default = "default_site")]
    pub site: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Attempts per call for transient transport failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
    #[serde(default = "default_edit_summary")]
    pub edit_summary: String,
}

fn default_api_url() -> String {
    "https://commons.wikimedia.org/w/api.php".to_string()
}

fn default_site_url() -> String {
    "https://commons.wikimedia.org".to_string()
}

fn default_site() -> String {
    "commonswiki".to_string()
}

fn default_user_agent() -> String {
    concat!("curator/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_initial() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    10_000
}

fn default_chunk_size() -> usize {
    2 * 1024 * 1024
}

fn default_edit_summary() -> String {
    "Uploaded with Curator".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            site_url: default_site_url(),
            site: default_site(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout(),
            max_attempts: default_max_attempts(),
            backoff_initial_ms: default_backoff_initial(),
            backoff_max_ms: default_backoff_max(),
            chunk_size_bytes: default_chunk_size(),
            edit_summary: default_edit_summary(),
        }
    }
}
