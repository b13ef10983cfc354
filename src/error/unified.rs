//! Error classification for user-facing messaging.

use super::{AuthError, InteractiveFailure};

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The cached session cannot be used; interactive sign-in is required.
    Reauthentication,
    /// Connectivity, throttling, or upstream outage.
    Transient,
    /// The user explicitly rejected the request.
    Declined,
    Cancelled,
    Configuration,
    Unknown,
}

/// What the UI should tell the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserNotice {
    SignInAgain,
    TemporaryFailure,
    UserDeclined,
    Cancelled,
    CheckConfiguration,
    Unexpected,
}

impl UserNotice {
    pub fn message(&self) -> &'static str {
        match self {
            Self::SignInAgain => "Your session has ended. Please sign in again.",
            Self::TemporaryFailure => "Temporary failure reaching the sign-in services. Retrying.",
            Self::UserDeclined => "You declined the authorization request.",
            Self::Cancelled => "Sign-in was cancelled.",
            Self::CheckConfiguration => "Sign-in is not configured correctly.",
            Self::Unexpected => "Sign-in failed unexpectedly.",
        }
    }
}

impl AuthError {
    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::SilentRefresh { .. } | Self::NotSignedIn => ErrorCategory::Reauthentication,
            Self::OAuthDevice { code, .. } => match code.as_str() {
                "access_denied" => ErrorCategory::Declined,
                "expired_token" => ErrorCategory::Reauthentication,
                _ => ErrorCategory::Unknown,
            },
            Self::InteractiveAuth(InteractiveFailure::Cancelled) | Self::Cancelled => {
                ErrorCategory::Cancelled
            }
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::SignInFailed { last, .. } => last.category(),
            other if other.is_transient() => ErrorCategory::Transient,
            Self::Exchange { .. } => ErrorCategory::Reauthentication,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Suggest the notice the UI should surface.
    pub fn user_notice(&self) -> UserNotice {
        match self.category() {
            ErrorCategory::Reauthentication => UserNotice::SignInAgain,
            ErrorCategory::Transient => UserNotice::TemporaryFailure,
            ErrorCategory::Declined => UserNotice::UserDeclined,
            ErrorCategory::Cancelled => UserNotice::Cancelled,
            ErrorCategory::Configuration => UserNotice::CheckConfiguration,
            ErrorCategory::Unknown => UserNotice::Unexpected,
        }
    }
}
