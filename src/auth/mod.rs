//! Bearer-token authentication against the identity service.
//!
//! The flow: password grant → short-lived access token plus refresh token →
//! silent renewal shortly before expiry or after the ingestion API rejects
//! the token. A pre-issued token can be used instead, without renewal.

pub mod credential;
pub mod endpoints;
pub mod error;
pub mod issuer;
pub mod responses;

use std::sync::Arc;
use std::time::Duration;

pub use self::credential::{Credential, StaticToken, TokenSource};
use self::endpoints::IdentityEndpoint;
use self::error::AuthError;
use self::issuer::{HttpTokenIssuer, TokenIssuer};

/// Log in with an email and a password obtained lazily from `password_provider`.
///
/// The provider is only consulted once the issuer has been built, so a bad
/// identity-service URL is reported before the user is prompted.
pub async fn authenticate(
    endpoint: IdentityEndpoint,
    email: &str,
    password_provider: &dyn Fn() -> Option<String>,
    timeout: Duration,
) -> Result<Credential, AuthError> {
    let issuer: Arc<dyn TokenIssuer> = Arc::new(HttpTokenIssuer::new(endpoint, timeout)?);
    authenticate_with(issuer, email, password_provider).await
}

pub(crate) async fn authenticate_with(
    issuer: Arc<dyn TokenIssuer>,
    email: &str,
    password_provider: &dyn Fn() -> Option<String>,
) -> Result<Credential, AuthError> {
    let password = password_provider()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AuthError::FailedLogin("Password provider returned no data".into()))?;

    let credential = Credential::login(issuer, email, &password).await?;
    tracing::info!(
        "Authenticated as {} (token valid until {})",
        credential.user_id().unwrap_or(email),
        credential.expires_at()
    );
    Ok(credential)
}
