//! Request/response bodies of the three exchange hops.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct TokenRequest<P> {
    pub properties: P,
    pub relying_party: String,
    pub token_type: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct RegionalProperties {
    pub auth_method: &'static str,
    pub site_name: String,
    pub rps_ticket: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct PlatformProperties {
    pub sandbox_id: String,
    pub user_tokens: Vec<String>,
}

/// Shared response shape of the regional and platform hops.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct TokenResponse {
    pub token: String,
    #[serde(default)]
    pub display_claims: DisplayClaims,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DisplayClaims {
    #[serde(default)]
    pub xui: Vec<UserClaim>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserClaim {
    pub uhs: Option<String>,
}

impl TokenResponse {
    /// User hash from the first claims entry.
    pub fn user_hash(&self) -> Option<&str> {
        self.display_claims
            .xui
            .first()
            .and_then(|claim| claim.uhs.as_deref())
            .filter(|uhs| !uhs.is_empty())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionRequest {
    pub identity_token: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionResponse {
    pub username: Option<String>,
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: u64,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Error body returned by the platform hop on 401.
#[derive(Debug, Deserialize)]
pub(crate) struct PlatformRejection {
    #[serde(rename = "XErr")]
    pub xerr: Option<u64>,
    #[serde(rename = "Message")]
    pub message: Option<String>,
}
