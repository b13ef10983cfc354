//! Lazily resolved user profile for the current game session.

use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::auth::GameSessionToken;
use crate::config::ProfileConfig;
use crate::error::AuthError;
use crate::util::timeout::with_timeout;

/// User-facing profile derived from a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub display_name: String,
    /// Texture URL of the active skin, if any.
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    id: String,
    name: String,
    #[serde(default)]
    skins: Vec<SkinEntry>,
}

#[derive(Debug, Deserialize)]
struct SkinEntry {
    url: String,
    #[serde(default)]
    state: String,
}

impl From<ProfileResponse> for Profile {
    fn from(resp: ProfileResponse) -> Self {
        let avatar_url = resp
            .skins
            .iter()
            .find(|skin| skin.state.eq_ignore_ascii_case("active"))
            .or_else(|| resp.skins.first())
            .map(|skin| skin.url.clone());
        Self {
            id: resp.id,
            display_name: resp.name,
            avatar_url,
        }
    }
}

#[derive(Default)]
struct ProfileSlot {
    token: Option<GameSessionToken>,
    profile: Option<Profile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileLookup {
    pub profile: Profile,
    pub fetched: bool,
}

/// Session-scoped profile cache owned by the orchestrator.
///
/// `get` returns the cached profile or fetches it when a session token is
/// present. A 401 from the profile endpoint drops both the token and the
/// profile and reports [`AuthError::NotSignedIn`].
pub struct ProfileCache {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    slot: Mutex<ProfileSlot>,
}

impl ProfileCache {
    pub fn new(config: &ProfileConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.url.clone(),
            timeout: config.timeout(),
            slot: Mutex::new(ProfileSlot::default()),
        }
    }

    /// Start a new session: store the token and forget any previous profile.
    pub async fn init(&self, token: GameSessionToken) {
        let mut slot = self.slot.lock().await;
        slot.token = Some(token);
        slot.profile = None;
    }

    /// Swap in a refreshed token for the same session, keeping the profile.
    pub async fn update_token(&self, token: GameSessionToken) {
        self.slot.lock().await.token = Some(token);
    }

    pub async fn get(&self) -> Result<Profile, AuthError> {
        self.lookup().await.map(|lookup| lookup.profile)
    }

    /// Same as [`ProfileCache::get`], also reporting whether the profile was
    /// fetched by this call.
    pub async fn lookup(&self) -> Result<ProfileLookup, AuthError> {
        let mut slot = self.slot.lock().await;
        if let Some(profile) = &slot.profile {
            return Ok(ProfileLookup {
                profile: profile.clone(),
                fetched: false,
            });
        }
        let Some(token) = slot.token.clone() else {
            return Err(AuthError::NotSignedIn);
        };

        match self.fetch(&token).await {
            Ok(profile) => {
                tracing::debug!(profile_id = %profile.id, "Profile fetched");
                slot.profile = Some(profile.clone());
                Ok(ProfileLookup {
                    profile,
                    fetched: true,
                })
            }
            Err(AuthError::NotSignedIn) => {
                tracing::info!("Profile endpoint rejected the session token; clearing session");
                slot.token = None;
                slot.profile = None;
                Err(AuthError::NotSignedIn)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn cached(&self) -> Option<Profile> {
        self.slot.lock().await.profile.clone()
    }

    pub async fn has_session(&self) -> bool {
        self.slot.lock().await.token.is_some()
    }

    pub async fn clear(&self) {
        let mut slot = self.slot.lock().await;
        slot.token = None;
        slot.profile = None;
    }

    async fn fetch(&self, token: &GameSessionToken) -> Result<Profile, AuthError> {
        with_timeout("profile", self.timeout, async {
            let resp = self
                .client
                .get(&self.url)
                .header(ACCEPT, "application/json")
                .header(AUTHORIZATION, token.authorization_header())
                .send()
                .await?;
            match resp.status() {
                StatusCode::UNAUTHORIZED => Err(AuthError::NotSignedIn),
                status if status.is_success() => {
                    let body: ProfileResponse = resp
                        .json()
                        .await
                        .map_err(|e| AuthError::InvalidResponse(format!("profile body: {e}")))?;
                    Ok(Profile::from(body))
                }
                status => Err(AuthError::InvalidResponse(format!(
                    "profile request failed with status {status}"
                ))),
            }
        })
        .await
    }
}
