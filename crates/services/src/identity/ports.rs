use async_trait::async_trait;

use crate::UserId;

/// Identity of the caller as attested by the auth provider
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub email: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Auth provider error: {0}")]
    Upstream(String),
}

/// Verifies a bearer token against the auth provider and resolves the user
/// it belongs to. Injected so handlers and tests can substitute a double.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify_token(&self, token: &str) -> Result<AuthenticatedUser, IdentityError>;
}
