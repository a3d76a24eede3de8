use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::endpoints::IdentityEndpoint;
use super::error::AuthError;
use super::responses::{GrantErrorBody, TokenGrant};

/// Exchanges secrets for tokens at the identity service.
///
/// Object-safe so a [`Credential`](super::Credential) can hold the issuer it
/// was minted by and renew itself later without knowing about HTTP.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Email/password login.
    async fn password_grant(&self, email: &str, password: &str) -> Result<TokenGrant, AuthError>;

    /// Trade a refresh token for a new access token.
    async fn refresh_grant(&self, refresh_token: &str) -> Result<TokenGrant, AuthError>;

    /// Base URL of the issuing service, for diagnostics.
    fn endpoint(&self) -> &str;
}

/// [`TokenIssuer`] backed by the GoTrue token endpoint.
pub struct HttpTokenIssuer {
    client: Client,
    endpoint: IdentityEndpoint,
}

impl std::fmt::Debug for HttpTokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTokenIssuer")
            .field("base_url", &self.endpoint.base_url)
            .field("anon_key", &"<redacted>")
            .finish()
    }
}

impl HttpTokenIssuer {
    pub fn new(endpoint: IdentityEndpoint, timeout: Duration) -> Result<Self, AuthError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    async fn grant(&self, url: &str, body: serde_json::Value) -> Result<TokenGrant, AuthError> {
        tracing::debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .header("apikey", &self.endpoint.anon_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Connection {
                url: self.endpoint.base_url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let text = response.text().await.unwrap_or_default();
            let body: GrantErrorBody = serde_json::from_str(&text).unwrap_or_default();
            return Err(AuthError::Rejected(body.message().to_string()));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AuthError::ApiError {
                code: status.as_u16(),
                message: text,
            });
        }

        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    async fn password_grant(&self, email: &str, password: &str) -> Result<TokenGrant, AuthError> {
        let body = serde_json::json!({ "email": email, "password": password });
        self.grant(&self.endpoint.password_grant_url(), body).await
    }

    async fn refresh_grant(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        let body = serde_json::json!({ "refresh_token": refresh_token });
        self.grant(&self.endpoint.refresh_grant_url(), body).await
    }

    fn endpoint(&self) -> &str {
        &self.endpoint.base_url
    }
}
