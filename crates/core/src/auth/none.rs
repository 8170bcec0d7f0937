use async_trait::async_trait;

use super::{AuthError, AuthRequest, Authenticator, Identity};

/// Authenticator that accepts all requests as anonymous
/// Must be explicitly configured - the system won't default to this
pub struct NoneAuthenticator {
    anonymous_is_admin: bool,
}

impl NoneAuthenticator {
    pub fn new() -> Self {
        Self {
            anonymous_is_admin: false,
        }
    }

    /// Grant admin rights to the anonymous user (single-user deployments).
    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.anonymous_is_admin = is_admin;
        self
    }
}

impl Default for NoneAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for NoneAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError> {
        Ok(Identity::anonymous()
            .with_admin(self.anonymous_is_admin)
            .with_credential(request.remote_credential()))
    }

    fn method_name(&self) -> &'static str {
        "none"
    }
}
