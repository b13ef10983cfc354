use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default poll interval when the provider does not send one.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Interval growth applied on every `slow_down`.
pub const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

/// Device-code response from the authorization server.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceAuthSession {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    #[serde(default)]
    pub interval: Option<u64>,
}

impl DeviceAuthSession {
    pub fn poll_interval(&self) -> Duration {
        match self.interval {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.expires_in)
    }
}

impl fmt::Debug for DeviceAuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceAuthSession")
            .field("device_code", &"<redacted>")
            .field("user_code", &self.user_code)
            .field("verification_uri", &self.verification_uri)
            .field("expires_in", &self.expires_in)
            .field("interval", &self.interval)
            .finish()
    }
}

/// One poll answer from the token endpoint.
#[derive(Clone, Default, Deserialize)]
pub struct PollResponse {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl PollResponse {
    pub fn pending() -> Self {
        Self::error("authorization_pending")
    }

    pub fn error(code: &str) -> Self {
        Self {
            error: Some(code.to_string()),
            ..Default::default()
        }
    }

    pub fn granted(access_token: &str) -> Self {
        Self {
            access_token: Some(access_token.to_string()),
            token_type: Some("bearer".to_string()),
            ..Default::default()
        }
    }
}

impl fmt::Debug for PollResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollResponse")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Developer access token granted by the device flow.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceToken {
    pub access_token: String,
    pub token_type: String,
    pub scope: Option<String>,
}

impl fmt::Debug for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Device-flow lifecycle. Transitions only move forward; terminal states
/// never change once reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFlowState {
    Requesting,
    AwaitingUser(DeviceAuthSession),
    Polling {
        session: DeviceAuthSession,
        interval: Duration,
    },
    Succeeded(DeviceToken),
    Denied,
    Expired,
    Cancelled,
    Failed {
        code: String,
        description: Option<String>,
    },
}

impl DeviceFlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded(_) | Self::Denied | Self::Expired | Self::Cancelled | Self::Failed { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Requesting => "requesting",
            Self::AwaitingUser(_) => "awaiting_user",
            Self::Polling { .. } => "polling",
            Self::Succeeded(_) => "succeeded",
            Self::Denied => "denied",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Profile of the connected developer account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeveloperProfile {
    pub login: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Developer token plus the cached profile.
#[derive(Clone, PartialEq, Eq)]
pub struct DeveloperAccount {
    pub access_token: String,
    pub profile: Option<DeveloperProfile>,
}

impl fmt::Debug for DeveloperAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeveloperAccount")
            .field("access_token", &"<redacted>")
            .field("profile", &self.profile)
            .finish()
    }
}
