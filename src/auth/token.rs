use std::fmt;

use chrono::{DateTime, Duration, Utc};

/// Handle for the single cached consumer account.
///
/// The refresh material behind it lives in the provider's token cache; this
/// handle never carries a game session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerAccount {
    pub account_id: String,
    pub username: Option<String>,
}

/// Access token issued by the consumer identity tenant.
#[derive(Clone, PartialEq, Eq)]
pub struct ConsumerToken {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for ConsumerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerToken")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of a successful interactive sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSignIn {
    pub account: ConsumerAccount,
    pub token: ConsumerToken,
}

/// Bearer credential for the game backend.
///
/// The only artifact that leaves the pipeline. `Debug` never prints the
/// bearer value; use [`GameSessionToken::bearer`] explicitly.
///
/// # Example
/// ```
/// use portcullis::auth::GameSessionToken;
///
/// let token = GameSessionToken::new("eyJ...", "Bearer", 86_400);
/// assert!(!format!("{token:?}").contains("eyJ"));
/// assert_eq!(token.authorization_header(), "Bearer eyJ...");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct GameSessionToken {
    access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
    /// Game-service account name reported by the session hop, when present.
    pub username: Option<String>,
}

/// `now + secs`, or `None` when the result falls outside chrono's range.
pub(crate) fn expiry_after(secs: i64) -> Option<DateTime<Utc>> {
    Utc::now().checked_add_signed(Duration::try_seconds(secs)?)
}

impl GameSessionToken {
    /// Lifetimes past the representable range saturate to the latest instant.
    pub fn new(access_token: impl Into<String>, token_type: impl Into<String>, expires_in: u64) -> Self {
        let access_token = access_token.into();
        let token_type = token_type.into();
        Self::try_new(access_token.clone(), token_type.clone(), expires_in).unwrap_or(Self {
            access_token,
            token_type,
            expires_in,
            expires_at: DateTime::<Utc>::MAX_UTC,
            username: None,
        })
    }

    /// `None` when `expires_in` does not fit a timestamp.
    pub fn try_new(
        access_token: impl Into<String>,
        token_type: impl Into<String>,
        expires_in: u64,
    ) -> Option<Self> {
        let expires_at = expiry_after(i64::try_from(expires_in).ok()?)?;
        Some(Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            expires_in,
            expires_at,
            username: None,
        })
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    pub fn bearer(&self) -> &str {
        &self.access_token
    }

    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

impl fmt::Debug for GameSessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameSessionToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .field("username", &self.username)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_secrets() {
        let session = GameSessionToken::new("secret-session", "Bearer", 60);
        let consumer = ConsumerToken {
            access_token: "secret-consumer".to_string(),
            expires_at: None,
        };
        assert!(!format!("{session:?}").contains("secret-session"));
        assert!(!format!("{consumer:?}").contains("secret-consumer"));
    }

    #[test]
    fn expiry_is_derived_from_expires_in() {
        let token = GameSessionToken::new("t", "Bearer", 3600);
        let remaining = token.expires_at - Utc::now();
        assert!(remaining > Duration::minutes(59));
        assert!(!token.is_expired());
        assert!(GameSessionToken::new("t", "Bearer", 0).is_expired());
    }

    #[test]
    fn out_of_range_lifetime_does_not_panic() {
        assert!(GameSessionToken::try_new("t", "Bearer", u64::MAX).is_none());
        assert!(GameSessionToken::try_new("t", "Bearer", 100_000_000_000_000_000).is_none());
        let saturated = GameSessionToken::new("t", "Bearer", u64::MAX);
        assert_eq!(saturated.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(!saturated.is_expired());
        assert!(expiry_after(i64::MAX).is_none());
    }
}
