use async_trait::async_trait;

use super::ports::{AuthenticatedUser, IdentityError, IdentityVerifier};
use crate::UserId;

/// Token verifier backed by a GoTrue-compatible auth endpoint.
///
/// Tokens are opaque to this service; every request is validated upstream by
/// asking the provider to resolve the user behind the token.
pub struct GoTrueVerifier {
    base_url: String,
    anon_key: String,
    client: reqwest::Client,
}

impl GoTrueVerifier {
    pub fn new(base_url: String, anon_key: String) -> Self {
        Self {
            base_url,
            anon_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl IdentityVerifier for GoTrueVerifier {
    async fn verify_token(&self, token: &str) -> Result<AuthenticatedUser, IdentityError> {
        tracing::debug!("Verifying bearer token with auth provider");

        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .bearer_auth(token)
            .header("apikey", &self.anon_key)
            .send()
            .await
            .map_err(|e| IdentityError::Upstream(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            tracing::debug!("Auth provider rejected token: status={}", status);
            return Err(IdentityError::InvalidToken);
        }
        if !status.is_success() {
            tracing::error!("Auth provider request failed: status={}", status);
            return Err(IdentityError::Upstream(format!(
                "Unexpected status from auth provider: {}",
                status
            )));
        }

        let user_data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| IdentityError::Upstream(e.to_string()))?;

        let user_id: UserId = user_data["id"]
            .as_str()
            .ok_or(IdentityError::InvalidToken)?
            .parse()
            .map_err(|_| IdentityError::InvalidToken)?;
        let email = user_data["email"].as_str().map(|s| s.to_string());

        tracing::debug!("Token verified: user_id={}", user_id);

        Ok(AuthenticatedUser { user_id, email })
    }
}
