use super::{
    types::{AuthMethod, Config},
    ConfigError,
};
use crate::store::CredentialCipher;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - API key auth has at least one key
/// - Rate limit budget and remote transfer settings are non-zero
/// - At least one worker when workers are enabled
/// - The credential key, when set, is base64 of 32 bytes
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.auth.method == AuthMethod::ApiKey && config.auth.api_keys.is_empty() {
        return Err(ConfigError::ValidationError(
            "auth.api_keys must not be empty when method = \"api_key\"".to_string(),
        ));
    }

    if config.rate_limit.uploads_per_period == 0 || config.rate_limit.period_secs == 0 {
        return Err(ConfigError::ValidationError(
            "rate_limit.uploads_per_period and rate_limit.period_secs must be positive"
                .to_string(),
        ));
    }

    if config.remote.chunk_size_bytes == 0 {
        return Err(ConfigError::ValidationError(
            "remote.chunk_size_bytes cannot be 0".to_string(),
        ));
    }

    if config.remote.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "remote.max_attempts must be at least 1".to_string(),
        ));
    }

    if config.gateway.max_slice_items == 0 {
        return Err(ConfigError::ValidationError(
            "gateway.max_slice_items cannot be 0".to_string(),
        ));
    }

    if config.workers.enabled && config.workers.privileged + config.workers.normal == 0 {
        return Err(ConfigError::ValidationError(
            "workers are enabled but no worker is configured".to_string(),
        ));
    }

    if let Some(key) = &config.credentials.key {
        CredentialCipher::from_base64(key)
            .map_err(|e| ConfigError::ValidationError(format!("credentials.key: {}", e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn base() -> Config {
        load_config_from_str(
            r#"
[auth]
method = "none"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&base()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = base();
        config.server.port = 0;
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_api_key_without_keys_fails() {
        let mut config = base();
        config.auth.method = AuthMethod::ApiKey;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_rate_budget_fails() {
        let mut config = base();
        config.rate_limit.uploads_per_period = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_no_workers_fails() {
        let mut config = base();
        config.workers.privileged = 0;
        config.workers.normal = 0;
        assert!(validate_config(&config).is_err());

        config.workers.enabled = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_credential_key() {
        let mut config = base();
        config.credentials.key = Some("too-short".to_string());
        assert!(validate_config(&config).is_err());

        config.credentials.key = Some(CredentialCipher::generate_key());
        assert!(validate_config(&config).is_ok());
    }
}
