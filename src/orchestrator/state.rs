use std::time::Duration;

use bon::Builder;
use chrono::{DateTime, Utc};

use crate::auth::ConsumerAccount;
use crate::error::AuthError;
use crate::profile::Profile;

/// Orchestrator lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    SignedOut,
    /// A whole sign-in attempt is running; `attempt` is 1-based.
    SigningIn { attempt: u32 },
    SignedIn { account: ConsumerAccount },
    RefreshingSilently,
    /// Terminal until `sign_out` resets it.
    Error(AuthError),
}

impl AuthState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SignedOut => "signed out",
            Self::SigningIn { .. } => "signing in",
            Self::SignedIn { .. } => "signed in",
            Self::RefreshingSilently => "refreshing",
            Self::Error(_) => "error",
        }
    }
}

/// Notifications for the UI. Never carries a session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    StateChanged(AuthState),
    ProfileChanged(Option<Profile>),
    SessionRefreshed { expires_at: DateTime<Utc> },
}

/// Tunables for [`super::AuthOrchestrator`].
///
/// ```
/// use std::time::Duration;
/// use portcullis::orchestrator::OrchestratorOptions;
///
/// let options = OrchestratorOptions::builder()
///     .retry_delay(Duration::from_millis(250))
///     .build();
/// assert_eq!(options.sign_in_attempts, 3);
/// ```
#[derive(Debug, Clone, Builder)]
pub struct OrchestratorOptions {
    #[builder(default = 3)]
    pub sign_in_attempts: u32,
    #[builder(default = Duration::from_secs(1))]
    pub retry_delay: Duration,
    #[builder(default = Duration::from_secs(60))]
    pub background_retry_interval: Duration,
    #[builder(default = default_scopes())]
    pub scopes: Vec<String>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn default_scopes() -> Vec<String> {
    vec!["XboxLive.signin".to_string(), "offline_access".to_string()]
}
