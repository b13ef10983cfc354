mod auth_support;

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use portcullis::auth::{BrowserLauncher, ConsumerIdentityProvider, MsaIdentityProvider};
use portcullis::config::ConsumerConfig;
use portcullis::error::{AuthError, InteractiveFailure};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use auth_support::{account, RedirectingBrowser, ACCOUNT_ID};

fn scopes() -> Vec<String> {
    vec!["XboxLive.signin".to_string(), "offline_access".to_string()]
}

fn consumer_config(server: &MockServer) -> ConsumerConfig {
    ConsumerConfig {
        client_id: "client-1".to_string(),
        authorize_url: format!("{}/authorize", server.uri()),
        token_url: format!("{}/token", server.uri()),
        interactive_timeout_secs: 10,
        ..ConsumerConfig::default()
    }
}

fn provider(server: &MockServer, browser: Arc<dyn BrowserLauncher>) -> MsaIdentityProvider {
    MsaIdentityProvider::new(consumer_config(server), browser)
}

fn id_token(claims: serde_json::Value) -> String {
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("eyJhbGciOiJub25lIn0.{payload}.sig")
}

/// Cache blob holding one account whose access token has already expired.
fn stale_cache_blob() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "version": 1,
        "accounts": [{
            "account_id": ACCOUNT_ID,
            "username": "player@example.com",
            "refresh_token": "rt-1",
            "access_token": "old-access",
            "expires_at": "2020-01-01T00:00:00Z",
            "scopes": scopes()
        }]
    }))
    .unwrap()
}

#[tokio::test]
async fn interactive_sign_in_redeems_code_with_pkce() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code-1"))
        .and(body_string_contains("code_verifier="))
        .and(body_string_contains("client_id=client-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "consumer-access",
            "refresh_token": "rt-1",
            "expires_in": 3600,
            "id_token": id_token(json!({"oid": "oid-1", "preferred_username": "player@example.com"}))
        })))
        .expect(1)
        .mount(&server)
        .await;
    let browser = Arc::new(RedirectingBrowser::with_code("auth-code-1"));
    let provider = provider(&server, browser.clone());

    let signed_in = provider.acquire_interactive(&scopes()).await.expect("sign in");

    assert_eq!(signed_in.account.account_id, "oid-1");
    assert_eq!(signed_in.account.username.as_deref(), Some("player@example.com"));
    assert_eq!(signed_in.token.access_token, "consumer-access");
    assert!(provider.has_state_changed());
    assert_eq!(provider.accounts(), vec![signed_in.account.clone()]);

    let opened = browser.opened();
    assert_eq!(opened.len(), 1);
    assert!(opened[0].contains("code_challenge_method=S256"));
    assert!(opened[0].contains("prompt=select_account"));
    assert!(opened[0].contains("redirect_uri=http%3A%2F%2Flocalhost%3A"));

    // Fresh access token is served from the cache without another request.
    let token = provider
        .acquire_silent(&signed_in.account, &scopes())
        .await
        .expect("silent");
    assert_eq!(token.access_token, "consumer-access");
}

#[tokio::test]
async fn declined_consent_is_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let provider = provider(&server, Arc::new(RedirectingBrowser::with_error("access_denied")));

    let err = provider.acquire_interactive(&scopes()).await.unwrap_err();

    assert_eq!(err, AuthError::InteractiveAuth(InteractiveFailure::Cancelled));
    assert!(provider.accounts().is_empty());
}

#[tokio::test]
async fn rejected_code_redemption_reports_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "code expired"
        })))
        .mount(&server)
        .await;
    let provider = provider(&server, Arc::new(RedirectingBrowser::with_code("stale")));

    let err = provider.acquire_interactive(&scopes()).await.unwrap_err();

    assert_eq!(
        err,
        AuthError::InteractiveAuth(InteractiveFailure::Provider {
            code: "invalid_grant".to_string(),
            description: Some("code expired".to_string()),
        })
    );
}

#[tokio::test]
async fn missing_client_id_is_a_configuration_error() {
    let server = MockServer::start().await;
    let browser = Arc::new(RedirectingBrowser::with_code("unused"));
    let provider = MsaIdentityProvider::new(
        ConsumerConfig {
            client_id: String::new(),
            ..consumer_config(&server)
        },
        browser.clone(),
    );

    let err = provider.acquire_interactive(&scopes()).await.unwrap_err();

    assert!(matches!(err, AuthError::Configuration(_)));
    assert!(browser.opened().is_empty());
}

#[tokio::test]
async fn expired_access_token_is_refreshed_and_rotated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-access",
            "refresh_token": "rt-2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    let provider = provider(&server, Arc::new(RedirectingBrowser::with_code("unused")));
    provider.import_cache(&stale_cache_blob()).unwrap();
    assert!(!provider.has_state_changed());

    let token = provider
        .acquire_silent(&account(ACCOUNT_ID), &scopes())
        .await
        .expect("refresh");

    assert_eq!(token.access_token, "new-access");
    assert!(provider.has_state_changed());
    let exported: serde_json::Value =
        serde_json::from_slice(&provider.export_cache().unwrap()).unwrap();
    assert_eq!(exported["accounts"][0]["refresh_token"], "rt-2");
    assert!(!provider.has_state_changed());
}

#[tokio::test]
async fn invalid_grant_is_a_silent_refresh_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked"
        })))
        .mount(&server)
        .await;
    let provider = provider(&server, Arc::new(RedirectingBrowser::with_code("unused")));
    provider.import_cache(&stale_cache_blob()).unwrap();

    let err = provider
        .acquire_silent(&account(ACCOUNT_ID), &scopes())
        .await
        .unwrap_err();

    assert_eq!(err, AuthError::silent_refresh("invalid_grant"));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn token_endpoint_outage_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let provider = provider(&server, Arc::new(RedirectingBrowser::with_code("unused")));
    provider.import_cache(&stale_cache_blob()).unwrap();

    let err = provider
        .acquire_silent(&account(ACCOUNT_ID), &scopes())
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Network(_)));
    assert!(err.is_transient());
    assert_eq!(provider.accounts(), vec![account(ACCOUNT_ID)]);
}
