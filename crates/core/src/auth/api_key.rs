//! API Key authentication.

use async_trait::async_trait;
use std::collections::HashSet;

use super::{AuthError, AuthRequest, Authenticator, Identity};
use crate::config::ApiKeyEntry;

/// Authenticator that maps configured API keys to user ids.
///
/// Accepts the key in either:
/// - `Authorization: Bearer <key>` header
/// - `X-API-Key: <key>` header
pub struct ApiKeyAuthenticator {
    keys: Vec<ApiKeyEntry>,
    admins: HashSet<String>,
}

impl ApiKeyAuthenticator {
    pub fn new(keys: Vec<ApiKeyEntry>) -> Self {
        Self {
            keys,
            admins: HashSet::new(),
        }
    }

    pub fn with_admins(mut self, admins: impl IntoIterator<Item = String>) -> Self {
        self.admins = admins.into_iter().collect();
        self
    }

    /// Extract API key from request headers.
    fn extract_key(&self, request: &AuthRequest) -> Option<String> {
        if let Some(auth_header) = request.headers.get("authorization") {
            if let Some(key) = auth_header
                .strip_prefix("Bearer ")
                .or_else(|| auth_header.strip_prefix("bearer "))
            {
                return Some(key.to_string());
            }
        }

        request.headers.get("x-api-key").cloned()
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError> {
        let provided_key = self
            .extract_key(request)
            .ok_or(AuthError::NotAuthenticated)?;

        // Scan every entry so timing does not reveal which key matched
        let mut matched: Option<&ApiKeyEntry> = None;
        for entry in &self.keys {
            if constant_time_eq(provided_key.as_bytes(), entry.key.as_bytes()) {
                matched = Some(entry);
            }
        }

        let entry = matched.ok_or_else(|| AuthError::InvalidCredentials("Invalid API key".to_string()))?;

        Ok(Identity {
            user_id: entry.user_id.clone(),
            method: "api_key".to_string(),
            is_admin: self.admins.contains(&entry.user_id),
            credential: request.remote_credential(),
            claims: std::collections::HashMap::new(),
        })
    }

    fn method_name(&self) -> &'static str {
        "api_key"
    }
}

/// Constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn make_request(headers: Vec<(&str, &str)>) -> AuthRequest {
        AuthRequest {
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v.to_string()))
                .collect(),
            source_ip: "127.0.0.1".parse::<IpAddr>().unwrap(),
        }
    }

    fn authenticator() -> ApiKeyAuthenticator {
        ApiKeyAuthenticator::new(vec![
            ApiKeyEntry {
                key: "alice-key".to_string(),
                user_id: "alice".to_string(),
            },
            ApiKeyEntry {
                key: "root-key".to_string(),
                user_id: "root".to_string(),
            },
        ])
        .with_admins(vec!["root".to_string()])
    }

    #[tokio::test]
    async fn test_bearer_token_maps_to_user() {
        let request = make_request(vec![
            ("Authorization", "Bearer alice-key"),
            ("X-Remote-Token", "oauth-alice"),
        ]);

        let identity = authenticator().authenticate(&request).await.unwrap();

        assert_eq!(identity.user_id, "alice");
        assert_eq!(identity.method, "api_key");
        assert!(!identity.is_admin);
        assert_eq!(identity.credential.as_deref(), Some("oauth-alice"));
    }

    #[tokio::test]
    async fn test_x_api_key_header_admin() {
        let request = make_request(vec![("X-API-Key", "root-key")]);

        let identity = authenticator().authenticate(&request).await.unwrap();

        assert_eq!(identity.user_id, "root");
        assert!(identity.is_admin);
    }

    #[tokio::test]
    async fn test_invalid_key() {
        let request = make_request(vec![("Authorization", "bearer wrong-key")]);
        let result = authenticator().authenticate(&request).await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials(_))));
    }

    #[tokio::test]
    async fn test_missing_header() {
        let result = authenticator().authenticate(&make_request(vec![])).await;
        assert!(matches!(result, Err(AuthError::NotAuthenticated)));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hell"));
        assert!(constant_time_eq(b"", b""));
    }
}
