use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// Header carrying the caller's credential for the remote repository.
pub const REMOTE_CREDENTIAL_HEADER: &str = "x-remote-token";

/// Request information for authentication
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub headers: HashMap<String, String>,
    pub source_ip: IpAddr,
}

impl AuthRequest {
    /// Remote repository credential forwarded by the client, if any.
    pub fn remote_credential(&self) -> Option<String> {
        self.headers
            .get(REMOTE_CREDENTIAL_HEADER)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// Authenticated identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub method: String,
    #[serde(default)]
    pub is_admin: bool,
    /// Credential used by background uploads on behalf of this user.
    /// Never serialized.
    #[serde(skip)]
    pub credential: Option<String>,
    pub claims: HashMap<String, serde_json::Value>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            user_id: "anonymous".to_string(),
            method: "none".to_string(),
            is_admin: false,
            credential: None,
            claims: HashMap::new(),
        }
    }

    /// Identity for a known user, mostly useful in tests and tooling.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            method: "internal".to_string(),
            is_admin: false,
            credential: None,
            claims: HashMap::new(),
        }
    }

    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential;
        self
    }

    /// Whether this identity may act on something owned by `owner`.
    pub fn can_access(&self, owner: &str) -> bool {
        self.is_admin || self.user_id == owner
    }
}
