use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use super::error::AuthError;
use super::issuer::TokenIssuer;
use super::responses::TokenGrant;

/// Refresh this long before the recorded expiry. A single 100 MiB chunk can
/// take minutes on a slow link, so the token must still be valid when the
/// request finishes, not only when it starts.
pub const EXPIRY_BUFFER: TimeDelta = TimeDelta::seconds(300);

/// Lifecycle of a [`Credential`].
///
/// `Valid → NeedsRefresh` happens by the clock; `NeedsRefresh → Valid` on a
/// successful refresh; a failed refresh moves to `Invalid`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Valid,
    NeedsRefresh,
    Invalid,
}

/// Expiry `secs` from now, or `None` when the lifetime does not fit a timestamp.
fn expiry_after(secs: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_seconds(secs).and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
}

/// Anything that can hand the upload engine a bearer token.
///
/// Taken as `&mut` by the engine: one operation uses the credential at a
/// time, and a renewal mutates it in place.
#[async_trait]
pub trait TokenSource: Send {
    /// A token that is fresh right now, renewing first if it is about to expire.
    async fn valid_token(&mut self) -> Result<String, AuthError>;

    /// Whether [`force_refresh`](Self::force_refresh) can possibly succeed.
    fn can_refresh(&self) -> bool;

    /// Renew regardless of the recorded expiry, e.g. after the server rejected
    /// a token we believed to be valid.
    async fn force_refresh(&mut self) -> Result<(), AuthError>;
}

/// Access/refresh token pair minted by a [`TokenIssuer`], renewable in place.
pub struct Credential {
    access_token: String,
    refresh_token: String,
    user_id: Option<String>,
    expires_at: DateTime<Utc>,
    issuer: Arc<dyn TokenIssuer>,
    invalid: bool,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .field("issuer", &self.issuer.endpoint())
            .field("invalid", &self.invalid)
            .finish()
    }
}

impl Credential {
    pub(crate) fn new(
        access_token: String,
        refresh_token: String,
        user_id: Option<String>,
        expires_at: DateTime<Utc>,
        issuer: Arc<dyn TokenIssuer>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            user_id,
            expires_at,
            issuer,
            invalid: false,
        }
    }

    fn from_grant(grant: TokenGrant, issuer: Arc<dyn TokenIssuer>) -> Result<Self, AuthError> {
        let expires_at = expiry_after(grant.expires_in_secs()).ok_or_else(|| {
            AuthError::FailedLogin(format!(
                "token lifetime out of range: {}s",
                grant.expires_in_secs()
            ))
        })?;
        let user_id = grant.user_id().map(str::to_string);
        Ok(Self::new(
            grant.access_token,
            grant.refresh_token.unwrap_or_default(),
            user_id,
            expires_at,
            issuer,
        ))
    }

    /// Log in with email and password.
    pub async fn login(
        issuer: Arc<dyn TokenIssuer>,
        email: &str,
        password: &str,
    ) -> Result<Self, AuthError> {
        tracing::debug!("Authenticating as {} at {}", email, issuer.endpoint());
        let grant = issuer
            .password_grant(email, password)
            .await
            .map_err(|e| match e {
                AuthError::Rejected(msg) => AuthError::FailedLogin(msg),
                other => other,
            })?;
        if grant.access_token.is_empty() {
            return Err(AuthError::FailedLogin("No access token in response".into()));
        }
        Self::from_grant(grant, issuer)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn issuer_endpoint(&self) -> &str {
        self.issuer.endpoint()
    }

    pub fn state(&self) -> CredentialState {
        if self.invalid {
            CredentialState::Invalid
        } else if self.is_expiring(EXPIRY_BUFFER) {
            CredentialState::NeedsRefresh
        } else {
            CredentialState::Valid
        }
    }

    /// True once `now >= expires_at - buffer`.
    pub fn is_expiring(&self, buffer: TimeDelta) -> bool {
        self.is_expiring_at(Utc::now(), buffer)
    }

    pub fn is_expiring_at(&self, now: DateTime<Utc>, buffer: TimeDelta) -> bool {
        now >= self.expires_at - buffer
    }

    /// Exchange the refresh token for a new token set.
    ///
    /// On success all three fields are replaced together. On failure nothing
    /// is overwritten and the credential becomes [`CredentialState::Invalid`].
    pub async fn refresh(&mut self) -> Result<(), AuthError> {
        if self.invalid {
            return Err(AuthError::Invalidated);
        }
        if self.refresh_token.is_empty() {
            self.invalid = true;
            return Err(AuthError::RefreshFailed("no refresh token".into()));
        }

        tracing::debug!("Refreshing access token (expires {})", self.expires_at);
        let grant = match self.issuer.refresh_grant(&self.refresh_token).await {
            Ok(grant) if !grant.access_token.is_empty() => grant,
            Ok(_) => {
                self.invalid = true;
                return Err(AuthError::RefreshFailed("no access token in response".into()));
            }
            Err(e) => {
                self.invalid = true;
                return Err(AuthError::RefreshFailed(e.to_string()));
            }
        };

        let Some(expires_at) = expiry_after(grant.expires_in_secs()) else {
            self.invalid = true;
            return Err(AuthError::RefreshFailed(format!(
                "token lifetime out of range: {}s",
                grant.expires_in_secs()
            )));
        };
        self.refresh_token = grant.refresh_token.unwrap_or_else(|| self.refresh_token.clone());
        self.access_token = grant.access_token;
        self.expires_at = expires_at;
        tracing::info!("Access token refreshed, valid until {}", expires_at);
        Ok(())
    }
}

#[async_trait]
impl TokenSource for Credential {
    async fn valid_token(&mut self) -> Result<String, AuthError> {
        match self.state() {
            CredentialState::Invalid => return Err(AuthError::Invalidated),
            CredentialState::NeedsRefresh => self.refresh().await?,
            CredentialState::Valid => {}
        }
        Ok(self.access_token.clone())
    }

    fn can_refresh(&self) -> bool {
        self.state() != CredentialState::Invalid && !self.refresh_token.is_empty()
    }

    async fn force_refresh(&mut self) -> Result<(), AuthError> {
        self.refresh().await
    }
}

/// A pre-issued bearer token with no way to renew it.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn valid_token(&mut self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }

    fn can_refresh(&self) -> bool {
        false
    }

    async fn force_refresh(&mut self) -> Result<(), AuthError> {
        Err(AuthError::Rejected(
            "token was rejected and cannot be refreshed".into(),
        ))
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::{credential_expiring_in, FakeIssuer};
    use super::*;

    #[test]
    fn test_is_expiring_respects_buffer() {
        let issuer = FakeIssuer::new();
        let cred = credential_expiring_in(issuer, 600);
        let now = Utc::now();
        assert!(!cred.is_expiring_at(now, EXPIRY_BUFFER));
        assert!(cred.is_expiring_at(now + TimeDelta::seconds(301), EXPIRY_BUFFER));
        assert!(cred.is_expiring_at(now, TimeDelta::seconds(700)));
    }

    #[test]
    fn test_state_follows_clock() {
        let issuer = FakeIssuer::new();
        assert_eq!(
            credential_expiring_in(issuer.clone(), 3600).state(),
            CredentialState::Valid
        );
        assert_eq!(
            credential_expiring_in(issuer.clone(), 60).state(),
            CredentialState::NeedsRefresh
        );
        assert_eq!(
            credential_expiring_in(issuer, -60).state(),
            CredentialState::NeedsRefresh
        );
    }

    #[tokio::test]
    async fn test_expired_credential_refreshes_once() {
        let issuer = FakeIssuer::new();
        let mut cred = credential_expiring_in(issuer.clone(), -10);
        let token = cred.valid_token().await.unwrap();
        assert_eq!(token, "access-1");
        assert_eq!(issuer.refresh_count(), 1);

        // now fresh for an hour: no further refresh
        let token = cred.valid_token().await.unwrap();
        assert_eq!(token, "access-1");
        assert_eq!(issuer.refresh_count(), 1);
        assert_eq!(cred.state(), CredentialState::Valid);
    }

    #[tokio::test]
    async fn test_distant_expiry_never_refreshes() {
        let issuer = FakeIssuer::new();
        let mut cred = credential_expiring_in(issuer.clone(), 7200);
        assert_eq!(cred.valid_token().await.unwrap(), "access-0");
        assert_eq!(issuer.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_tokens_and_invalidates() {
        let issuer = FakeIssuer::new();
        issuer.fail_refresh.store(true, Ordering::SeqCst);
        let mut cred = credential_expiring_in(issuer.clone(), -10);
        let before = cred.expires_at();

        let err = cred.valid_token().await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshFailed(_)), "got {:?}", err);
        assert_eq!(cred.state(), CredentialState::Invalid);
        assert_eq!(cred.expires_at(), before);
        assert_eq!(cred.access_token, "access-0");
        assert_eq!(cred.refresh_token, "refresh-0");

        // terminal: no further calls to the issuer
        let err = cred.valid_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Invalidated));
        assert_eq!(issuer.refresh_count(), 1);
        assert!(!cred.can_refresh());
    }

    #[tokio::test]
    async fn test_oversized_lifetime_on_refresh_invalidates() {
        let issuer = FakeIssuer::new();
        issuer.oversized_lifetime.store(true, Ordering::SeqCst);
        let mut cred = credential_expiring_in(issuer.clone(), -10);
        let before = cred.expires_at();

        let err = cred.valid_token().await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshFailed(_)), "got {:?}", err);
        assert_eq!(cred.state(), CredentialState::Invalid);
        assert_eq!(cred.expires_at(), before);
        assert_eq!(cred.access_token, "access-0");
    }

    #[tokio::test]
    async fn test_oversized_lifetime_on_login_fails() {
        let issuer = FakeIssuer::new();
        issuer.oversized_lifetime.store(true, Ordering::SeqCst);
        let err = Credential::login(issuer, "a@b.c", "correct")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::FailedLogin(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_refresh_replaces_all_fields() {
        let issuer = FakeIssuer::new();
        let mut cred = credential_expiring_in(issuer, 10);
        cred.refresh().await.unwrap();
        assert_eq!(cred.access_token, "access-1");
        assert_eq!(cred.refresh_token, "refresh-1");
        assert!(cred.expires_at() > Utc::now() + TimeDelta::seconds(3500));
    }

    #[tokio::test]
    async fn test_login_success_and_rejection() {
        let issuer = FakeIssuer::new();
        let cred = Credential::login(issuer.clone(), "a@b.c", "correct")
            .await
            .unwrap();
        assert_eq!(cred.user_id(), Some("user-1"));
        assert_eq!(cred.state(), CredentialState::Valid);
        assert_eq!(cred.issuer_endpoint(), "memory://identity");

        let err = Credential::login(issuer, "a@b.c", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::FailedLogin(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_static_token_cannot_refresh() {
        let mut token = StaticToken::new("bare");
        assert_eq!(token.valid_token().await.unwrap(), "bare");
        assert!(!token.can_refresh());
        assert!(token.force_refresh().await.is_err());
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let cred = credential_expiring_in(FakeIssuer::new(), 100);
        let dbg = format!("{:?}", cred);
        assert!(!dbg.contains("access-0"));
        assert!(!dbg.contains("refresh-0"));
        assert!(!format!("{:?}", StaticToken::new("bare")).contains("bare"));
    }
}
