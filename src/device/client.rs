use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use tokio_util::sync::CancellationToken;

use super::endpoint::{DeviceAuthorizationEndpoint, HttpDeviceEndpoint};
use super::flow::DeviceFlow;
use super::prefs::{FilePreferenceStore, PreferenceStore};
use super::session::{DeveloperAccount, DeveloperProfile, DeviceFlowState, DeviceToken};
use crate::auth::{BrowserLauncher, SystemBrowser};
use crate::config::PortcullisConfig;
use crate::error::AuthError;
use crate::util::clock::{Clock, TokioClock};

const TOKEN_KEY: &str = "developer.access_token";
const PROFILE_KEY: &str = "developer.profile";

/// OAuth2 Device Authorization Grant client for the developer identity.
///
/// Independent of the game-session pipeline. A successful flow persists the
/// developer token (plaintext) and its profile through the [`PreferenceStore`].
///
/// # Example
/// ```no_run
/// use portcullis::config::PortcullisConfig;
/// use portcullis::device::DeviceCodeIdentityClient;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> portcullis::error::Result<()> {
/// let client = DeviceCodeIdentityClient::from_config(&PortcullisConfig::load()?)?;
/// let account = client
///     .start_device_flow(
///         |code, url, _expires_in| println!("Enter {code} at {url}"),
///         None,
///         CancellationToken::new(),
///     )
///     .await?;
/// println!("{:?}", account.profile);
/// # Ok(())
/// # }
/// ```
pub struct DeviceCodeIdentityClient {
    endpoint: Arc<dyn DeviceAuthorizationEndpoint>,
    prefs: Arc<dyn PreferenceStore>,
    browser: Option<Arc<dyn BrowserLauncher>>,
    clock: Arc<dyn Clock>,
    http: reqwest::Client,
    profile_url: Option<String>,
    default_timeout: Duration,
}

impl DeviceCodeIdentityClient {
    pub fn new(endpoint: Arc<dyn DeviceAuthorizationEndpoint>, prefs: Arc<dyn PreferenceStore>) -> Self {
        Self {
            endpoint,
            prefs,
            browser: None,
            clock: Arc::new(TokioClock),
            http: reqwest::Client::new(),
            profile_url: None,
            default_timeout: Duration::from_secs(900),
        }
    }

    pub fn from_config(config: &PortcullisConfig) -> Result<Self, AuthError> {
        config.developer.validate()?;
        let endpoint = Arc::new(HttpDeviceEndpoint::new(&config.developer));
        let prefs = Arc::new(FilePreferenceStore::new(config.preferences_path()));
        Ok(Self::new(endpoint, prefs)
            .with_browser(Arc::new(SystemBrowser))
            .with_profile_url(config.developer.profile_url.clone())
            .with_default_timeout(config.developer.default_timeout()))
    }

    pub fn with_browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_profile_url(mut self, url: impl Into<String>) -> Self {
        self.profile_url = Some(url.into());
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Build a flow without running it, for callers that drive it step by step.
    pub fn flow(
        &self,
        show_user_code: impl FnOnce(&str, &str, u64) + Send + 'static,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> DeviceFlow {
        let flow = DeviceFlow::new(
            Arc::clone(&self.endpoint),
            Arc::clone(&self.clock),
            timeout.unwrap_or(self.default_timeout),
            cancel,
            show_user_code,
        );
        match &self.browser {
            Some(browser) => flow.with_browser(Arc::clone(browser)),
            None => flow,
        }
    }

    /// Run the whole device flow.
    ///
    /// Denial and expiry surface as [`AuthError::OAuthDevice`] with
    /// `access_denied` / `expired_token`; cancellation and the caller's
    /// timeout surface as [`AuthError::Cancelled`].
    pub async fn start_device_flow(
        &self,
        show_user_code: impl FnOnce(&str, &str, u64) + Send + 'static,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Result<DeveloperAccount, AuthError> {
        let outcome = self.flow(show_user_code, timeout, cancel).run().await;
        tracing::info!(outcome = outcome.name(), "Device flow finished");
        match outcome {
            DeviceFlowState::Succeeded(token) => Ok(self.complete(token).await),
            DeviceFlowState::Denied => Err(AuthError::device(
                "access_denied",
                Some("the authorization request was declined".to_string()),
            )),
            DeviceFlowState::Expired => Err(AuthError::device(
                "expired_token",
                Some("the device code expired before authorization".to_string()),
            )),
            DeviceFlowState::Cancelled => Err(AuthError::Cancelled),
            DeviceFlowState::Failed { code, description } => Err(AuthError::device(code, description)),
            other => Err(AuthError::InvalidResponse(format!(
                "device flow stopped in non-terminal state {}",
                other.name()
            ))),
        }
    }

    /// Previously connected developer account, if any.
    pub async fn saved_account(&self) -> Result<Option<DeveloperAccount>, AuthError> {
        let prefs = Arc::clone(&self.prefs);
        let (token, profile) = tokio::task::spawn_blocking(move || {
            Ok::<_, AuthError>((prefs.get(TOKEN_KEY)?, prefs.get(PROFILE_KEY)?))
        })
        .await
        .map_err(|e| AuthError::Io(format!("preference task failed: {e}")))??;

        let Some(access_token) = token else {
            return Ok(None);
        };
        let profile = profile.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(profile) => Some(profile),
            Err(err) => {
                tracing::warn!(error = %err, "Ignoring unreadable developer profile");
                None
            }
        });
        Ok(Some(DeveloperAccount {
            access_token,
            profile,
        }))
    }

    pub async fn disconnect(&self) -> Result<(), AuthError> {
        let prefs = Arc::clone(&self.prefs);
        tokio::task::spawn_blocking(move || {
            prefs.remove(TOKEN_KEY)?;
            prefs.remove(PROFILE_KEY)
        })
        .await
        .map_err(|e| AuthError::Io(format!("preference task failed: {e}")))??;
        tracing::info!("Developer account disconnected");
        Ok(())
    }

    async fn complete(&self, token: DeviceToken) -> DeveloperAccount {
        let profile = match self.fetch_profile(&token.access_token).await {
            Ok(profile) => profile,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to fetch developer profile");
                None
            }
        };
        let account = DeveloperAccount {
            access_token: token.access_token,
            profile,
        };
        if let Err(err) = self.persist(&account).await {
            tracing::warn!(error = %err, "Failed to persist developer account");
        }
        account
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<Option<DeveloperProfile>, AuthError> {
        let Some(url) = &self.profile_url else {
            return Ok(None);
        };
        let resp = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, concat!("portcullis/", env!("CARGO_PKG_VERSION")))
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AuthError::InvalidResponse(format!(
                "developer profile request failed with status {}",
                resp.status()
            )));
        }
        Ok(Some(resp.json().await?))
    }

    async fn persist(&self, account: &DeveloperAccount) -> Result<(), AuthError> {
        let prefs = Arc::clone(&self.prefs);
        let token = account.access_token.clone();
        let profile = account
            .profile
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        tokio::task::spawn_blocking(move || {
            prefs.set(TOKEN_KEY, &token)?;
            match profile {
                Some(raw) => prefs.set(PROFILE_KEY, &raw),
                None => prefs.remove(PROFILE_KEY),
            }
        })
        .await
        .map_err(|e| AuthError::Io(format!("preference task failed: {e}")))?
    }
}
