use thiserror::Error;

/// Errors from the identity service and the credential lifecycle.
///
/// Every variant means "the request cannot be authenticated with what we
/// have"; none of them is retried by the upload engine.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Failed login: {0}")]
    FailedLogin(String),

    #[error("Token refresh failed: {0} - please re-authenticate")]
    RefreshFailed(String),

    #[error("Credential is no longer valid - please re-authenticate")]
    Invalidated,

    #[error("Authentication rejected: {0}")]
    Rejected(String),

    #[error("Could not reach identity service at {url}: {message}")]
    Connection { url: String, message: String },

    #[error("Identity service error (HTTP {code}): {message}")]
    ApiError { code: u16, message: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
