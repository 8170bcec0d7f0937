use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::gateway::GatewayConfig;
use crate::pipeline::PipelineConfig;
use crate::rate_limiter::RateLimitConfig;
use crate::remote::RemoteConfig;
use crate::source::{FlickrConfig, MapillaryConfig};
use crate::worker::WorkerConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub method: AuthMethod,
    /// Keys accepted by the `api_key` method, each bound to one user.
    #[serde(default)]
    pub api_keys: Vec<ApiKeyEntry>,
    /// Users allowed to cancel and retry work they do not own.
    #[serde(default)]
    pub admins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiKeyEntry {
    pub key: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    None,
    ApiKey,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("curator.db")
}

/// Source provider configuration. A provider without a section is disabled.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub mapillary: Option<MapillaryConfig>,
    #[serde(default)]
    pub flickr: Option<FlickrConfig>,
}

/// Key for remote credentials stored with queued uploads.
///
/// `key` is base64 of 32 bytes. Without it a per-process key is used and
/// requests still queued at shutdown lose their credential.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub key: Option<String>,
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub auth: SanitizedAuthConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub rate_limit: RateLimitConfig,
    pub workers: WorkerConfig,
    pub pipeline: PipelineConfig,
    pub remote: RemoteConfig,
    pub sources: SanitizedSourcesConfig,
    pub gateway: GatewayConfig,
    pub credentials: SanitizedCredentialsConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAuthConfig {
    pub method: String,
    pub api_keys_configured: usize,
    pub admins: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedSourcesConfig {
    pub mapillary_configured: bool,
    pub flickr_configured: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedCredentialsConfig {
    pub key_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            auth: SanitizedAuthConfig {
                method: match config.auth.method {
                    AuthMethod::None => "none".to_string(),
                    AuthMethod::ApiKey => "api_key".to_string(),
                },
                api_keys_configured: config.auth.api_keys.len(),
                admins: config.auth.admins.len(),
            },
            server: config.server.clone(),
            database: config.database.clone(),
            rate_limit: config.rate_limit.clone(),
            workers: config.workers.clone(),
            pipeline: config.pipeline.clone(),
            remote: config.remote.clone(),
            sources: SanitizedSourcesConfig {
                mapillary_configured: config
                    .sources
                    .mapillary
                    .as_ref()
                    .is_some_and(|m| !m.access_token.is_empty()),
                flickr_configured: config
                    .sources
                    .flickr
                    .as_ref()
                    .is_some_and(|f| !f.api_key.is_empty()),
            },
            gateway: config.gateway.clone(),
            credentials: SanitizedCredentialsConfig {
                key_configured: config.credentials.key.is_some(),
            },
        }
    }
}
