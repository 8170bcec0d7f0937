mod api_key;
mod none;
mod traits;
mod types;

pub use api_key::*;
pub use none::*;
pub use traits::*;
pub use types::*;

use crate::config::{AuthConfig, AuthMethod};

/// Factory function to create authenticator from config
pub fn create_authenticator(config: &AuthConfig) -> Result<Box<dyn Authenticator>, AuthError> {
    match config.method {
        AuthMethod::None => Ok(Box::new(
            NoneAuthenticator::new().with_admin(config.admins.iter().any(|a| a == "anonymous")),
        )),
        AuthMethod::ApiKey => {
            if config.api_keys.is_empty() {
                return Err(AuthError::ConfigurationError(
                    "api_keys must be set when using ApiKey auth method".to_string(),
                ));
            }
            Ok(Box::new(
                ApiKeyAuthenticator::new(config.api_keys.clone())
                    .with_admins(config.admins.iter().cloned()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiKeyEntry;

    #[test]
    fn test_create_authenticator_none() {
        let config = AuthConfig {
            method: AuthMethod::None,
            api_keys: vec![],
            admins: vec![],
        };
        let auth = create_authenticator(&config).unwrap();
        assert_eq!(auth.method_name(), "none");
    }

    #[test]
    fn test_create_authenticator_api_key() {
        let config = AuthConfig {
            method: AuthMethod::ApiKey,
            api_keys: vec![ApiKeyEntry {
                key: "secret".to_string(),
                user_id: "alice".to_string(),
            }],
            admins: vec![],
        };
        let auth = create_authenticator(&config).unwrap();
        assert_eq!(auth.method_name(), "api_key");
    }

    #[test]
    fn test_create_authenticator_api_key_missing_keys() {
        let config = AuthConfig {
            method: AuthMethod::ApiKey,
            api_keys: vec![],
            admins: vec![],
        };
        let result = create_authenticator(&config);
        assert!(matches!(result, Err(AuthError::ConfigurationError(_))));
    }
}
