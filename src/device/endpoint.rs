//! Device-code request and token poll against the developer identity provider.

use async_trait::async_trait;
use reqwest::header::ACCEPT;

use super::session::{DeviceAuthSession, PollResponse};
use crate::config::DeveloperConfig;
use crate::error::AuthError;

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Authorization-server side of the Device Authorization Grant.
#[async_trait]
pub trait DeviceAuthorizationEndpoint: Send + Sync {
    async fn request_code(&self) -> Result<DeviceAuthSession, AuthError>;

    /// One token poll. OAuth error codes come back inside `Ok`; `Err` is
    /// reserved for transport failures and unparseable bodies.
    async fn poll_token(&self, device_code: &str) -> Result<PollResponse, AuthError>;
}

#[derive(Debug, serde::Deserialize)]
struct OAuthErrorBody {
    error: String,
    error_description: Option<String>,
}

/// Form-encoded HTTP implementation.
#[derive(Debug, Clone)]
pub struct HttpDeviceEndpoint {
    client: reqwest::Client,
    client_id: String,
    scope: String,
    device_code_url: String,
    token_url: String,
}

impl HttpDeviceEndpoint {
    pub fn new(config: &DeveloperConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .unwrap_or_default();
        Self {
            client,
            client_id: config.client_id.clone(),
            scope: config.scope.clone(),
            device_code_url: config.device_code_url.clone(),
            token_url: config.token_url.clone(),
        }
    }
}

#[async_trait]
impl DeviceAuthorizationEndpoint for HttpDeviceEndpoint {
    async fn request_code(&self) -> Result<DeviceAuthSession, AuthError> {
        let resp = self
            .client
            .post(&self.device_code_url)
            .header(ACCEPT, "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(match serde_json::from_str::<OAuthErrorBody>(&body) {
                Ok(err) => AuthError::device(err.error, err.error_description),
                Err(_) => AuthError::InvalidResponse(format!(
                    "Device code request failed with status {status}"
                )),
            });
        }
        serde_json::from_str(&body)
            .map_err(|e| AuthError::InvalidResponse(format!("device code body: {e}")))
    }

    async fn poll_token(&self, device_code: &str) -> Result<PollResponse, AuthError> {
        let resp = self
            .client
            .post(&self.token_url)
            .header(ACCEPT, "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("device_code", device_code),
                ("grant_type", DEVICE_GRANT_TYPE),
            ])
            .send()
            .await?;
        // Pending/slow_down arrive as 400 on RFC 8628 servers and as 200 on
        // some providers, so the body decides.
        let status = resp.status();
        let body = resp.text().await?;
        serde_json::from_str::<PollResponse>(&body).map_err(|_| {
            AuthError::InvalidResponse(format!("Device token poll failed with status {status}"))
        })
    }
}
