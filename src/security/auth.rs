//! Authentication and authorization collaborator boundary.
//!
//! Token validation and permission checks belong to an external identity
//! service. The gateway only sees the `AuthProvider` trait. `StaticTokenAuth`
//! resolves tokens from config and exists for local runs and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::config::AuthConfig;

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub role: String,
    pub permissions: Vec<String>,
}

/// Why a token was not accepted.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid token")]
    InvalidToken,

    #[error("identity service unavailable: {0}")]
    Unavailable(String),

    #[error("identity service did not answer within {0}ms")]
    TimedOut(u64),
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Resolve a bearer token to a principal.
    async fn validate_token(&self, token: &str) -> Result<Principal, AuthError>;

    /// Whether `permissions` grant `required`.
    fn has_permission(&self, permissions: &[String], required: &str) -> bool {
        permissions
            .iter()
            .any(|p| p == required || p == "*" || wildcard_grants(p, required))
    }
}

/// `rides:*` grants `rides:cancel`.
fn wildcard_grants(granted: &str, required: &str) -> bool {
    granted
        .strip_suffix('*')
        .map(|prefix| prefix.ends_with(':') && required.starts_with(prefix))
        .unwrap_or(false)
}

/// Extract the token from an `Authorization: Bearer ...` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)
}

/// Token table loaded from config.
#[derive(Debug, Default)]
pub struct StaticTokenAuth {
    tokens: HashMap<String, Principal>,
}

impl StaticTokenAuth {
    pub fn from_config(config: &AuthConfig) -> Self {
        let tokens = config
            .tokens
            .iter()
            .map(|t| {
                (
                    t.token.clone(),
                    Principal {
                        id: t.actor_id.clone(),
                        role: t.role.clone(),
                        permissions: t.permissions.clone(),
                    },
                )
            })
            .collect();
        Self { tokens }
    }
}

#[async_trait]
impl AuthProvider for StaticTokenAuth {
    async fn validate_token(&self, token: &str) -> Result<Principal, AuthError> {
        self.tokens.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}
