use async_trait::async_trait;
use thiserror::Error;

use super::types::{AuthRequest, Identity};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    NotAuthenticated,

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Authentication service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

/// Resolves the caller of an HTTP or WebSocket request to an [`Identity`].
///
/// The identity carries the user id that owns batches, the admin flag used
/// by cancel/retry, and the transient remote credential handed to uploads.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError>;

    /// Name of this authentication method
    fn method_name(&self) -> &'static str;
}
