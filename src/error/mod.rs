//! Error types for portcullis.

pub mod unified;

pub use unified::{ErrorCategory, UserNotice};

use strum::{Display, EnumString};
use thiserror::Error;

/// One of the three chained token-exchange hops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ExchangeHop {
    Regional,
    Platform,
    Session,
}

/// Why a single exchange hop failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HopFailure {
    #[error("unexpected status {status}{}", suffix(.detail))]
    Status { status: u16, detail: Option<String> },
    #[error("missing claim `{0}`")]
    MissingClaim(String),
    #[error("malformed body: {0}")]
    Malformed(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

impl HopFailure {
    /// Failures that may clear up on their own (throttling, server errors, transport).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Transport(_) => true,
            Self::MissingClaim(_) | Self::Malformed(_) => false,
        }
    }
}

/// How an interactive browser sign-in failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InteractiveFailure {
    #[error("cancelled by user")]
    Cancelled,
    #[error("browser flow failed: {0}")]
    BrowserFailed(String),
    #[error("provider returned `{code}`{}", suffix(.description))]
    Provider {
        code: String,
        description: Option<String>,
    },
}

/// Normalized authentication errors across the sign-in pipeline and the device flow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("Interactive sign-in failed: {0}")]
    InteractiveAuth(InteractiveFailure),

    #[error("Silent refresh failed: {reason}")]
    SilentRefresh { reason: String },

    #[error("Token exchange failed at {hop} hop: {cause}")]
    Exchange { hop: ExchangeHop, cause: HopFailure },

    #[error("Device authorization error `{code}`{}", suffix(.description))]
    OAuthDevice {
        code: String,
        description: Option<String>,
    },

    #[error("Timed out after {after_ms}ms during {stage}")]
    NetworkTimeout { stage: String, after_ms: u64 },

    #[error("Sign-in failed after {attempts} attempt(s): {last}")]
    SignInFailed { attempts: u32, last: Box<AuthError> },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AuthError {
    pub fn exchange(hop: ExchangeHop, cause: HopFailure) -> Self {
        Self::Exchange { hop, cause }
    }

    pub fn silent_refresh(reason: impl Into<String>) -> Self {
        Self::SilentRefresh {
            reason: reason.into(),
        }
    }

    pub fn device(code: impl Into<String>, description: Option<String>) -> Self {
        Self::OAuthDevice {
            code: code.into(),
            description,
        }
    }

    /// The hop that failed, when this error came out of the exchange chain.
    pub fn failed_hop(&self) -> Option<ExchangeHop> {
        match self {
            Self::Exchange { hop, .. } => Some(*hop),
            Self::NetworkTimeout { stage, .. } => stage.parse().ok(),
            Self::SignInFailed { last, .. } => last.failed_hop(),
            _ => None,
        }
    }

    /// Whether a whole sign-in attempt should be repeated after this error.
    ///
    /// Individual hops are never retried on their own; this only drives the
    /// outer whole-chain retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Configuration(_) | Self::Cancelled | Self::SignInFailed { .. }
        )
    }

    /// Whether the failure says nothing about the validity of the cached
    /// account (connectivity, throttling, upstream outage).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::NetworkTimeout { .. } => true,
            Self::Exchange { cause, .. } => cause.is_transient(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::NetworkTimeout {
                stage: error
                    .url()
                    .and_then(|url| url.host_str().map(str::to_string))
                    .unwrap_or_else(|| "request".to_string()),
                after_ms: 0,
            }
        } else {
            Self::Network(error.to_string())
        }
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for AuthError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::ser::Error> for AuthError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

fn suffix(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|d| format!(": {d}"))
        .unwrap_or_default()
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_error_names_the_hop() {
        let err = AuthError::exchange(
            ExchangeHop::Platform,
            HopFailure::Status {
                status: 401,
                detail: Some("no platform account".to_string()),
            },
        );
        assert_eq!(
            err.to_string(),
            "Token exchange failed at platform hop: unexpected status 401: no platform account"
        );
        assert_eq!(err.failed_hop(), Some(ExchangeHop::Platform));
    }

    #[test]
    fn timeout_stage_parses_back_to_hop() {
        let err = AuthError::NetworkTimeout {
            stage: "regional".to_string(),
            after_ms: 200,
        };
        assert_eq!(err.failed_hop(), Some(ExchangeHop::Regional));
        assert!(err.is_transient());
    }

    #[test]
    fn server_errors_are_transient_but_rejections_are_not() {
        let outage = AuthError::exchange(
            ExchangeHop::Session,
            HopFailure::Status {
                status: 503,
                detail: None,
            },
        );
        let rejected = AuthError::exchange(
            ExchangeHop::Session,
            HopFailure::Status {
                status: 403,
                detail: None,
            },
        );
        assert!(outage.is_transient());
        assert!(!rejected.is_transient());
        assert!(!AuthError::silent_refresh("invalid_grant").is_transient());
    }

    #[test]
    fn configuration_and_cancellation_are_not_retried() {
        assert!(!AuthError::Configuration("missing client id".into()).is_retryable());
        assert!(!AuthError::Cancelled.is_retryable());
        assert!(AuthError::InteractiveAuth(InteractiveFailure::Cancelled).is_retryable());
        assert!(AuthError::Network("reset".into()).is_retryable());
    }
}
