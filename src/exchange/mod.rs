//! Three-hop exchange from a consumer access token to a game session token.

mod wire;

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::{ConsumerToken, GameSessionToken};
use crate::config::ExchangeConfig;
use crate::error::{AuthError, ExchangeHop, HopFailure};
use crate::util::timeout::{clamp_timeout, with_timeout};
use wire::{
    PlatformProperties, PlatformRejection, RegionalProperties, SessionRequest, SessionResponse,
    TokenRequest, TokenResponse,
};

const CONTRACT_VERSION_HEADER: &str = "x-xbl-contract-version";

struct RegionalIdentityToken {
    token: String,
    user_hash: String,
}

struct PlatformAuthorizationToken {
    token: String,
    user_hash: String,
}

/// Pure HTTP chain: consumer token → regional token → platform token → session token.
///
/// Hops run strictly in order and each consumes the previous hop's output.
/// The first failing hop short-circuits the chain with an error naming it;
/// nothing is retried or cached here.
///
/// # Example
/// ```no_run
/// use portcullis::auth::ConsumerToken;
/// use portcullis::config::ExchangeConfig;
/// use portcullis::exchange::GameServiceTokenExchanger;
///
/// # async fn run(consumer: ConsumerToken) -> portcullis::error::Result<()> {
/// let exchanger = GameServiceTokenExchanger::new(ExchangeConfig::default());
/// let session = exchanger.exchange(&consumer).await?;
/// println!("session expires at {}", session.expires_at);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GameServiceTokenExchanger {
    client: reqwest::Client,
    config: ExchangeConfig,
    hop_timeout: Duration,
}

impl GameServiceTokenExchanger {
    pub fn new(config: ExchangeConfig) -> Self {
        let hop_timeout = config.hop_timeout();
        Self {
            client: reqwest::Client::new(),
            config,
            hop_timeout,
        }
    }

    /// Override the per-hop timeout taken from the config. Values under one
    /// second are raised to one second.
    pub fn with_hop_timeout(mut self, timeout: Duration) -> Self {
        self.hop_timeout = clamp_timeout(timeout);
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub async fn exchange(&self, consumer: &ConsumerToken) -> Result<GameSessionToken, AuthError> {
        let regional = self.regional_hop(&consumer.access_token).await?;
        let platform = self.platform_hop(regional).await?;
        let session = self.session_hop(platform).await?;
        tracing::info!(
            expires_in = session.expires_in,
            "Game session token issued"
        );
        Ok(session)
    }

    async fn regional_hop(&self, consumer_token: &str) -> Result<RegionalIdentityToken, AuthError> {
        let hop = ExchangeHop::Regional;
        let body = TokenRequest {
            properties: RegionalProperties {
                auth_method: "RPS",
                site_name: self.config.site_name.clone(),
                rps_ticket: format!("d={consumer_token}"),
            },
            relying_party: self.config.regional_relying_party.clone(),
            token_type: "JWT",
        };
        let resp: TokenResponse = self
            .post(hop, &self.config.regional_url, &body, xbl_headers())
            .await?;
        let user_hash = resp
            .user_hash()
            .ok_or_else(|| missing_claim(hop))?
            .to_string();
        Ok(RegionalIdentityToken {
            token: resp.token,
            user_hash,
        })
    }

    async fn platform_hop(
        &self,
        regional: RegionalIdentityToken,
    ) -> Result<PlatformAuthorizationToken, AuthError> {
        let hop = ExchangeHop::Platform;
        let body = TokenRequest {
            properties: PlatformProperties {
                sandbox_id: self.config.sandbox_id.clone(),
                user_tokens: vec![regional.token],
            },
            relying_party: self.config.platform_relying_party.clone(),
            token_type: "JWT",
        };
        let resp: TokenResponse = self
            .post(hop, &self.config.platform_url, &body, xbl_headers())
            .await?;
        let user_hash = resp
            .user_hash()
            .ok_or_else(|| missing_claim(hop))?
            .to_string();
        if user_hash != regional.user_hash {
            tracing::debug!("Platform hop returned a different user hash than the regional hop");
        }
        Ok(PlatformAuthorizationToken {
            token: resp.token,
            user_hash,
        })
    }

    async fn session_hop(
        &self,
        platform: PlatformAuthorizationToken,
    ) -> Result<GameSessionToken, AuthError> {
        let hop = ExchangeHop::Session;
        let body = SessionRequest {
            identity_token: format!(
                "{} x={};{}",
                self.config.identity_scheme, platform.user_hash, platform.token
            ),
        };
        let resp: SessionResponse = self
            .post(hop, &self.config.session_url, &body, HeaderMap::new())
            .await?;
        if resp.access_token.is_empty() {
            return Err(AuthError::exchange(
                hop,
                HopFailure::MissingClaim("access_token".to_string()),
            ));
        }
        let token = GameSessionToken::try_new(resp.access_token, resp.token_type, resp.expires_in)
            .ok_or_else(|| {
                AuthError::exchange(
                    hop,
                    HopFailure::Malformed(format!("expires_in out of range: {}", resp.expires_in)),
                )
            })?;
        Ok(token.with_username(resp.username))
    }

    async fn post<B, R>(
        &self,
        hop: ExchangeHop,
        url: &str,
        body: &B,
        headers: HeaderMap,
    ) -> Result<R, AuthError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let stage = hop.to_string();
        with_timeout(&stage, self.hop_timeout, async {
            let resp = self
                .client
                .post(url)
                .header(ACCEPT, "application/json")
                .headers(headers)
                .json(body)
                .send()
                .await
                .map_err(|e| transport_error(hop, e))?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                tracing::debug!(hop = %hop, status = status.as_u16(), "Exchange hop rejected");
                return Err(AuthError::exchange(
                    hop,
                    HopFailure::Status {
                        status: status.as_u16(),
                        detail: rejection_detail(hop, &text),
                    },
                ));
            }

            let bytes = resp.bytes().await.map_err(|e| transport_error(hop, e))?;
            let parsed = serde_json::from_slice(&bytes)
                .map_err(|e| AuthError::exchange(hop, HopFailure::Malformed(e.to_string())))?;
            tracing::debug!(hop = %hop, "Exchange hop succeeded");
            Ok(parsed)
        })
        .await
    }
}

fn xbl_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTRACT_VERSION_HEADER, HeaderValue::from_static("1"));
    headers
}

fn missing_claim(hop: ExchangeHop) -> AuthError {
    AuthError::exchange(hop, HopFailure::MissingClaim("xui[0].uhs".to_string()))
}

fn transport_error(hop: ExchangeHop, error: reqwest::Error) -> AuthError {
    if error.is_timeout() {
        return AuthError::NetworkTimeout {
            stage: hop.to_string(),
            after_ms: 0,
        };
    }
    AuthError::exchange(hop, HopFailure::Transport(error.to_string()))
}

fn rejection_detail(hop: ExchangeHop, body: &str) -> Option<String> {
    if hop == ExchangeHop::Platform {
        if let Ok(rejection) = serde_json::from_str::<PlatformRejection>(body) {
            if let Some(detail) = rejection.xerr.and_then(describe_xerr) {
                return Some(detail.to_string());
            }
            if let Some(message) = rejection.message.filter(|m| !m.is_empty()) {
                return Some(message);
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.chars().take(200).collect())
    }
}

/// Readable reason for a platform-hop `XErr` code.
pub fn describe_xerr(code: u64) -> Option<&'static str> {
    match code {
        2148916233 => Some("the account has no platform profile; create one before signing in"),
        2148916235 => Some("the platform service is not available in the account's region"),
        2148916236 | 2148916237 => Some("the account requires adult verification"),
        2148916238 => Some("child accounts must be added to a family by an adult"),
        _ => None,
    }
}
