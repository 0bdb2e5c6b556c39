//! Registry credentials issued by the backend

use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use serde::Deserialize;

/// Lifetime assumed when the backend gives no expiry hint
pub const DEFAULT_CREDENTIAL_TTL_SECS: i64 = 3600;

/// Treat a credential as expired this long before its actual expiry
const EXPIRY_MARGIN_SECS: i64 = 30;

/// Username presented to the registry when the backend does not name one
pub const DEFAULT_REGISTRY_USERNAME: &str = "beachvar";

/// Short-lived registry credential. Never persisted.
#[derive(Clone)]
pub struct RegistryCredential {
    pub token: SecretString,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

impl RegistryCredential {
    pub fn new(token: impl Into<String>, username: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            username: username.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_within(EXPIRY_MARGIN_SECS)
    }

    pub fn expires_within(&self, seconds: i64) -> bool {
        self.expires_at <= Utc::now() + Duration::seconds(seconds)
    }
}

impl std::fmt::Debug for RegistryCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredential")
            .field("username", &self.username)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// `GET /api/device/registry-token/` response body
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryTokenResponse {
    pub token: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Relative lifetime in seconds, used when `expires_at` is absent
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl RegistryTokenResponse {
    pub fn into_credential(self, now: DateTime<Utc>) -> RegistryCredential {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| now + Duration::seconds(secs)))
            .unwrap_or_else(|| now + Duration::seconds(DEFAULT_CREDENTIAL_TTL_SECS));

        let username = self
            .username
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_REGISTRY_USERNAME.to_string());

        RegistryCredential::new(self.token, username, expires_at)
    }
}
