use serde::Deserialize;

/// Token lifetime assumed when the identity service omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Response body of both the password grant and the refresh grant.
#[derive(Debug, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub user: Option<GrantUser>,
}

impl TokenGrant {
    pub fn expires_in_secs(&self) -> i64 {
        self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct GrantUser {
    pub id: String,
}

/// Error body returned with HTTP 400 by the identity service.
#[derive(Debug, Default, Deserialize)]
pub struct GrantErrorBody {
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl GrantErrorBody {
    pub fn message(&self) -> &str {
        self.error_description
            .as_deref()
            .or(self.msg.as_deref())
            .unwrap_or("Invalid credentials")
    }
}
