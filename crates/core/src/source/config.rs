//! Source provider configuration.

use serde::{Deserialize, Serialize};

/// Mapillary Graph API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapillaryConfig {
    /// Client access token (`MLY|...`).
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// SPARQL endpoint used to find files already carrying a Mapillary id.
    #[serde(default = "default_query_service_url")]
    pub query_service_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://graph.mapillary.com".to_string()
}

fn default_query_service_url() -> String {
    "https://commons-query.wikimedia.org/sparql".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for MapillaryConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            api_url: default_api_url(),
            query_service_url: default_query_service_url(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Flickr REST API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlickrConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_flickr_api_url")]
    pub api_url: String,
    /// Photos per album page, at most 500.
    #[serde(default = "default_flickr_page_size")]
    pub page_size: u32,
    /// Repository property holding Flickr photo ids. Without one, no item
    /// is reported as already present.
    #[serde(default)]
    pub existing_property: Option<String>,
    #[serde(default = "default_query_service_url")]
    pub query_service_url: String,
    #[serde(default = "default_flickr_timeout")]
    pub timeout_secs: u64,
}

fn default_flickr_api_url() -> String {
    "https://www.flickr.com/services/rest/".to_string()
}

fn default_flickr_page_size() -> u32 {
    500
}

fn default_flickr_timeout() -> u64 {
    60
}

impl Default for FlickrConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: default_flickr_api_url(),
            page_size: default_flickr_page_size(),
            existing_property: None,
            query_service_url: default_query_service_url(),
            timeout_secs: default_flickr_timeout(),
        }
    }
}
