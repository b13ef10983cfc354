use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::browser::BrowserLauncher;
use super::loopback::LoopbackListener;
use super::provider::ConsumerIdentityProvider;
use super::token::{expiry_after, ConsumerAccount, ConsumerSignIn, ConsumerToken};
use crate::config::ConsumerConfig;
use crate::error::{AuthError, InteractiveFailure};

const CACHE_VERSION: u32 = 1;
const REFRESH_GRACE_PERIOD_MINUTES: i64 = 5;
const REJECTION_CODES: &[&str] = &[
    "invalid_grant",
    "interaction_required",
    "consent_required",
    "login_required",
];

/// Consumer identity provider speaking OAuth2 authorization code + PKCE.
///
/// Interactive sign-in opens the system browser and receives the redirect on a
/// loopback listener; silent refresh redeems the cached refresh token. At most
/// one account is cached at a time.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use portcullis::auth::{MsaIdentityProvider, SystemBrowser};
/// use portcullis::config::ConsumerConfig;
///
/// let config = ConsumerConfig {
///     client_id: "00000000-0000-0000-0000-000000000000".to_string(),
///     ..Default::default()
/// };
/// let provider = MsaIdentityProvider::new(config, Arc::new(SystemBrowser));
/// ```
pub struct MsaIdentityProvider {
    client: reqwest::Client,
    config: ConsumerConfig,
    browser: Arc<dyn BrowserLauncher>,
    cache: Mutex<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    accounts: Vec<CachedAccount>,
    changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheBlob {
    version: u32,
    accounts: Vec<CachedAccount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedAccount {
    account_id: String,
    username: Option<String>,
    refresh_token: Option<String>,
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
    scopes: Vec<String>,
}

impl CachedAccount {
    fn handle(&self) -> ConsumerAccount {
        ConsumerAccount {
            account_id: self.account_id.clone(),
            username: self.username.clone(),
        }
    }

    fn token(&self) -> ConsumerToken {
        ConsumerToken {
            access_token: self.access_token.clone(),
            expires_at: self.expires_at,
        }
    }

    fn has_fresh_access_token(&self, scopes: &[String]) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        let covers_scopes = scopes.iter().all(|s| self.scopes.contains(s));
        covers_scopes && Utc::now() + Duration::minutes(REFRESH_GRACE_PERIOD_MINUTES) < expires_at
    }
}

impl MsaIdentityProvider {
    pub fn new(config: ConsumerConfig, browser: Arc<dyn BrowserLauncher>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .unwrap_or_default();
        Self {
            client,
            config,
            browser,
            cache: Mutex::new(CacheState::default()),
        }
    }

    fn with_cache<R>(&self, f: impl FnOnce(&mut CacheState) -> R) -> R {
        let mut guard = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn authorize_url(
        &self,
        redirect_uri: &str,
        scopes: &[String],
        state: &str,
        challenge: &str,
    ) -> Result<Url, AuthError> {
        let scope = scopes.join(" ");
        Url::parse_with_params(
            &self.config.authorize_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", redirect_uri),
                ("scope", scope.as_str()),
                ("state", state),
                ("code_challenge", challenge),
                ("code_challenge_method", "S256"),
                ("prompt", "select_account"),
            ],
        )
        .map_err(|e| AuthError::Configuration(format!("consumer.authorize_url is invalid: {e}")))
    }

    async fn redeem_code(
        &self,
        code: &str,
        redirect_uri: &str,
        verifier: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, AuthError> {
        let scope = scopes.join(" ");
        let resp = self
            .client
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", self.config.client_id.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("code_verifier", verifier),
                ("scope", scope.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        let body = resp.text().await.unwrap_or_default();
        let (code, description) = match serde_json::from_str::<OAuthErrorBody>(&body) {
            Ok(err) => (err.error, err.error_description),
            Err(_) => (format!("http_{}", status.as_u16()), None),
        };
        Err(AuthError::InteractiveAuth(InteractiveFailure::Provider {
            code,
            description,
        }))
    }

    async fn redeem_refresh_token(
        &self,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, AuthError> {
        let scope = scopes.join(" ");
        let resp = self
            .client
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.config.client_id.as_str()),
                ("refresh_token", refresh_token),
                ("scope", scope.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(AuthError::Network(format!(
                "token endpoint returned status {status}"
            )));
        }
        let body = resp.text().await.unwrap_or_default();
        let reason = match serde_json::from_str::<OAuthErrorBody>(&body) {
            Ok(err) if REJECTION_CODES.contains(&err.error.as_str()) => err.error,
            Ok(err) => format!("{} ({status})", err.error),
            Err(_) => format!("refresh rejected with status {status}"),
        };
        Err(AuthError::silent_refresh(reason))
    }
}

#[async_trait]
impl ConsumerIdentityProvider for MsaIdentityProvider {
    async fn acquire_interactive(&self, scopes: &[String]) -> Result<ConsumerSignIn, AuthError> {
        self.config.validate()?;
        let listener = LoopbackListener::bind(self.config.redirect_port).await?;
        let redirect_uri = listener.redirect_uri();
        let state = random_token();
        let verifier = random_token();
        let url = self.authorize_url(&redirect_uri, scopes, &state, &code_challenge(&verifier))?;

        self.browser.open(url.as_str()).map_err(|e| {
            AuthError::InteractiveAuth(InteractiveFailure::BrowserFailed(e.to_string()))
        })?;
        tracing::info!(port = listener.port(), "Waiting for consumer sign-in redirect");

        let params = listener
            .wait_for_redirect(&state, self.config.interactive_timeout())
            .await?;
        if let Some(error) = params.error {
            return Err(AuthError::InteractiveAuth(if error == "access_denied" {
                InteractiveFailure::Cancelled
            } else {
                InteractiveFailure::Provider {
                    code: error,
                    description: params.error_description,
                }
            }));
        }
        let code = params.code.ok_or_else(|| {
            AuthError::InvalidResponse("redirect carried neither code nor error".to_string())
        })?;

        let payload = self.redeem_code(&code, &redirect_uri, &verifier, scopes).await?;
        let claims = payload.id_token.as_deref().and_then(decode_id_token_claims);
        let cached = CachedAccount {
            account_id: claims
                .as_ref()
                .and_then(|c| c.oid.clone().or_else(|| c.sub.clone()))
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            username: claims.and_then(|c| c.preferred_username.or(c.name)),
            refresh_token: payload.refresh_token,
            access_token: payload.access_token,
            expires_at: payload.expires_in.and_then(expiry_after),
            scopes: scopes.to_vec(),
        };
        let result = ConsumerSignIn {
            account: cached.handle(),
            token: cached.token(),
        };
        self.with_cache(|cache| {
            cache.accounts = vec![cached];
            cache.changed = true;
        });
        Ok(result)
    }

    async fn acquire_silent(
        &self,
        account: &ConsumerAccount,
        scopes: &[String],
    ) -> Result<ConsumerToken, AuthError> {
        let cached = self
            .with_cache(|cache| {
                cache
                    .accounts
                    .iter()
                    .find(|a| a.account_id == account.account_id)
                    .cloned()
            })
            .ok_or_else(|| AuthError::silent_refresh("account is not in the token cache"))?;

        if cached.has_fresh_access_token(scopes) {
            return Ok(cached.token());
        }
        let refresh_token = cached
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::silent_refresh("no refresh token cached"))?;

        let payload = self.redeem_refresh_token(refresh_token, scopes).await?;
        let updated = CachedAccount {
            refresh_token: payload.refresh_token.or(cached.refresh_token.clone()),
            access_token: payload.access_token,
            expires_at: payload.expires_in.and_then(expiry_after),
            scopes: scopes.to_vec(),
            ..cached
        };
        let token = updated.token();
        self.with_cache(|cache| {
            if let Some(slot) = cache
                .accounts
                .iter_mut()
                .find(|a| a.account_id == updated.account_id)
            {
                *slot = updated;
                cache.changed = true;
            }
        });
        Ok(token)
    }

    fn accounts(&self) -> Vec<ConsumerAccount> {
        self.with_cache(|cache| cache.accounts.iter().map(CachedAccount::handle).collect())
    }

    fn remove_account(&self, account: &ConsumerAccount) {
        self.with_cache(|cache| {
            let before = cache.accounts.len();
            cache.accounts.retain(|a| a.account_id != account.account_id);
            if cache.accounts.len() != before {
                cache.changed = true;
            }
        });
    }

    fn export_cache(&self) -> Result<Vec<u8>, AuthError> {
        self.with_cache(|cache| {
            let blob = CacheBlob {
                version: CACHE_VERSION,
                accounts: cache.accounts.clone(),
            };
            let bytes = serde_json::to_vec(&blob)?;
            cache.changed = false;
            Ok(bytes)
        })
    }

    fn import_cache(&self, blob: &[u8]) -> Result<(), AuthError> {
        let parsed: CacheBlob = serde_json::from_slice(blob)?;
        if parsed.version != CACHE_VERSION {
            return Err(AuthError::Serialization(format!(
                "unsupported token cache version {}",
                parsed.version
            )));
        }
        self.with_cache(|cache| {
            cache.accounts = parsed.accounts;
            cache.changed = false;
        });
        Ok(())
    }

    fn has_state_changed(&self) -> bool {
        self.with_cache(|cache| cache.changed)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    oid: Option<String>,
    sub: Option<String>,
    preferred_username: Option<String>,
    name: Option<String>,
}

fn decode_id_token_claims(id_token: &str) -> Option<IdTokenClaims> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn random_token() -> String {
    let mut buf = [0u8; 32];
    for chunk in buf.chunks_mut(16) {
        let id = uuid::Uuid::new_v4();
        chunk.copy_from_slice(&id.as_bytes()[..chunk.len()]);
    }
    URL_SAFE_NO_PAD.encode(buf)
}

fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoBrowser;

    impl BrowserLauncher for NoBrowser {
        fn open(&self, _url: &str) -> Result<(), AuthError> {
            Err(AuthError::Io("no display".to_string()))
        }
    }

    fn provider() -> MsaIdentityProvider {
        let config = ConsumerConfig {
            client_id: "client".to_string(),
            ..Default::default()
        };
        MsaIdentityProvider::new(config, Arc::new(NoBrowser))
    }

    fn cached(account_id: &str) -> CachedAccount {
        CachedAccount {
            account_id: account_id.to_string(),
            username: Some("player@example.com".to_string()),
            refresh_token: Some("refresh".to_string()),
            access_token: "access".to_string(),
            expires_at: None,
            scopes: vec![],
        }
    }

    #[test]
    fn code_challenge_matches_rfc7636_vector() {
        assert_eq!(
            code_challenge("dBjftJeZ4CVP-mJ0kN6E4kE3yCYVx2cRyZJ9lA9VzEM"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn id_token_claims_are_decoded_without_verification() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"oid":"abc","preferred_username":"p@example.com"}"#);
        let claims = decode_id_token_claims(&format!("header.{payload}.sig")).unwrap();
        assert_eq!(claims.oid.as_deref(), Some("abc"));
        assert_eq!(claims.preferred_username.as_deref(), Some("p@example.com"));
        assert!(decode_id_token_claims("not-a-jwt").is_none());
    }

    #[test]
    fn export_resets_changed_flag_and_import_restores_accounts() {
        let source = provider();
        source.with_cache(|c| {
            c.accounts = vec![cached("acct-1")];
            c.changed = true;
        });
        assert!(source.has_state_changed());
        let blob = source.export_cache().unwrap();
        assert!(!source.has_state_changed());

        let restored = provider();
        restored.import_cache(&blob).unwrap();
        assert_eq!(restored.accounts()[0].account_id, "acct-1");
        assert!(!restored.has_state_changed());
    }

    #[test]
    fn import_rejects_unknown_version() {
        let err = provider()
            .import_cache(br#"{"version":99,"accounts":[]}"#)
            .unwrap_err();
        assert!(matches!(err, AuthError::Serialization(_)));
    }

    #[test]
    fn removing_unknown_account_does_not_mark_change() {
        let provider = provider();
        provider.remove_account(&ConsumerAccount {
            account_id: "ghost".to_string(),
            username: None,
        });
        assert!(!provider.has_state_changed());
    }

    #[tokio::test]
    async fn browser_failure_is_an_interactive_error() {
        let err = provider()
            .acquire_interactive(&["XboxLive.signin".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::InteractiveAuth(InteractiveFailure::BrowserFailed(_))
        ));
    }

    #[tokio::test]
    async fn silent_refresh_for_unknown_account_is_rejected() {
        let err = provider()
            .acquire_silent(
                &ConsumerAccount {
                    account_id: "ghost".to_string(),
                    username: None,
                },
                &[],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SilentRefresh { .. }));
    }
}
