#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use portcullis::auth::{
    BrowserLauncher, ConsumerAccount, ConsumerIdentityProvider, ConsumerSignIn, ConsumerToken,
    InteractiveConsumerIdentityClient, TokenCache,
};
use portcullis::config::{ExchangeConfig, ProfileConfig};
use portcullis::device::{
    DeviceAuthSession, DeviceAuthorizationEndpoint, PollResponse, PreferenceStore,
};
use portcullis::error::AuthError;
use portcullis::exchange::GameServiceTokenExchanger;
use portcullis::orchestrator::{AuthOrchestrator, OrchestratorOptions};
use portcullis::profile::ProfileCache;
use reqwest::Url;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ACCOUNT_ID: &str = "acct-1";
pub const SESSION_TOKEN: &str = "game-session-token";

// ---------------------------------------------------------------------------
// Consumer provider fake
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeState {
    accounts: Vec<ConsumerAccount>,
    changed: bool,
    interactive_script: VecDeque<AuthError>,
    silent_script: VecDeque<AuthError>,
    interactive_calls: u32,
    silent_calls: u32,
    interactive_pause: Option<Duration>,
}

/// Provider whose interactive and silent calls succeed unless a failure was
/// queued. The exported cache is a JSON list of account ids.
#[derive(Default)]
pub struct FakeConsumerProvider {
    state: Mutex<FakeState>,
}

impl FakeConsumerProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account() -> Self {
        let provider = Self::default();
        provider.seed_account(ACCOUNT_ID);
        provider
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake provider lock poisoned")
    }

    pub fn seed_account(&self, account_id: &str) {
        self.lock().accounts = vec![account(account_id)];
    }

    pub fn fail_interactive(&self, err: AuthError) {
        self.lock().interactive_script.push_back(err);
    }

    pub fn fail_silent(&self, err: AuthError) {
        self.lock().silent_script.push_back(err);
    }

    /// Hold the interactive call open after the account is cached, the way a
    /// real provider does while it finishes the code redemption.
    pub fn pause_interactive(&self, pause: Duration) {
        self.lock().interactive_pause = Some(pause);
    }

    pub fn interactive_calls(&self) -> u32 {
        self.lock().interactive_calls
    }

    pub fn silent_calls(&self) -> u32 {
        self.lock().silent_calls
    }

    pub fn account_ids(&self) -> Vec<String> {
        self.lock()
            .accounts
            .iter()
            .map(|a| a.account_id.clone())
            .collect()
    }
}

#[async_trait]
impl ConsumerIdentityProvider for FakeConsumerProvider {
    async fn acquire_interactive(&self, _scopes: &[String]) -> Result<ConsumerSignIn, AuthError> {
        let (account, pause) = {
            let mut state = self.lock();
            state.interactive_calls += 1;
            if let Some(err) = state.interactive_script.pop_front() {
                return Err(err);
            }
            let account = account(ACCOUNT_ID);
            state.accounts = vec![account.clone()];
            state.changed = true;
            (account, state.interactive_pause)
        };
        if let Some(pause) = pause {
            tokio::time::sleep(pause).await;
        }
        Ok(ConsumerSignIn {
            account,
            token: consumer_token(),
        })
    }

    async fn acquire_silent(
        &self,
        account: &ConsumerAccount,
        _scopes: &[String],
    ) -> Result<ConsumerToken, AuthError> {
        let mut state = self.lock();
        state.silent_calls += 1;
        if let Some(err) = state.silent_script.pop_front() {
            return Err(err);
        }
        if !state.accounts.iter().any(|a| a.account_id == account.account_id) {
            return Err(AuthError::silent_refresh("account not cached"));
        }
        Ok(consumer_token())
    }

    fn accounts(&self) -> Vec<ConsumerAccount> {
        self.lock().accounts.clone()
    }

    fn remove_account(&self, account: &ConsumerAccount) {
        let mut state = self.lock();
        let before = state.accounts.len();
        state.accounts.retain(|a| a.account_id != account.account_id);
        if state.accounts.len() != before {
            state.changed = true;
        }
    }

    fn export_cache(&self) -> Result<Vec<u8>, AuthError> {
        let mut state = self.lock();
        let ids: Vec<String> = state.accounts.iter().map(|a| a.account_id.clone()).collect();
        state.changed = false;
        Ok(serde_json::to_vec(&ids)?)
    }

    fn import_cache(&self, blob: &[u8]) -> Result<(), AuthError> {
        let ids: Vec<String> = serde_json::from_slice(blob)?;
        let mut state = self.lock();
        state.accounts = ids.iter().map(|id| account(id)).collect();
        state.changed = false;
        Ok(())
    }

    fn has_state_changed(&self) -> bool {
        self.lock().changed
    }
}

pub fn account(account_id: &str) -> ConsumerAccount {
    ConsumerAccount {
        account_id: account_id.to_string(),
        username: Some("player@example.com".to_string()),
    }
}

pub fn consumer_token() -> ConsumerToken {
    ConsumerToken {
        access_token: "consumer-access-token".to_string(),
        expires_at: None,
    }
}

// ---------------------------------------------------------------------------
// Browsers
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingBrowser {
    opened: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingBrowser {
    pub fn failing() -> Self {
        Self {
            opened: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().expect("browser lock poisoned").clone()
    }
}

impl BrowserLauncher for RecordingBrowser {
    fn open(&self, url: &str) -> Result<(), AuthError> {
        self.opened
            .lock()
            .expect("browser lock poisoned")
            .push(url.to_string());
        if self.fail {
            return Err(AuthError::Io("no display".to_string()));
        }
        Ok(())
    }
}

/// Plays the user: follows the authorize URL straight to the loopback
/// redirect with either a code or an OAuth error.
pub struct RedirectingBrowser {
    outcome: RedirectOutcome,
    opened: Mutex<Vec<String>>,
}

#[derive(Debug, Clone)]
pub enum RedirectOutcome {
    Code(String),
    Error(String),
}

impl RedirectingBrowser {
    pub fn with_code(code: &str) -> Self {
        Self {
            outcome: RedirectOutcome::Code(code.to_string()),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn with_error(error: &str) -> Self {
        Self {
            outcome: RedirectOutcome::Error(error.to_string()),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().expect("browser lock poisoned").clone()
    }
}

impl BrowserLauncher for RedirectingBrowser {
    fn open(&self, url: &str) -> Result<(), AuthError> {
        self.opened
            .lock()
            .expect("browser lock poisoned")
            .push(url.to_string());
        let parsed = Url::parse(url).expect("authorize url");
        let query: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
        let redirect_uri = query.get("redirect_uri").expect("redirect_uri").clone();
        let state = query.get("state").expect("state").clone();
        let target = match &self.outcome {
            RedirectOutcome::Code(code) => format!("{redirect_uri}/?code={code}&state={state}"),
            RedirectOutcome::Error(error) => format!(
                "{redirect_uri}/?error={error}&error_description=declined&state={state}"
            ),
        };
        tokio::spawn(async move {
            let _ = reqwest::get(target).await;
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Device flow fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryPreferenceStore {
    values: Mutex<HashMap<String, String>>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .expect("prefs lock poisoned")
            .get(key)
            .cloned()
    }
}

impl PreferenceStore for InMemoryPreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        Ok(self.value(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.values
            .lock()
            .expect("prefs lock poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AuthError> {
        self.values
            .lock()
            .expect("prefs lock poisoned")
            .remove(key);
        Ok(())
    }
}

/// Endpoint that hands out one session and replays queued poll answers,
/// answering `authorization_pending` once the queue is empty.
pub struct ScriptedDeviceEndpoint {
    session: DeviceAuthSession,
    polls: Mutex<VecDeque<Result<PollResponse, AuthError>>>,
    poll_calls: Mutex<u32>,
    code_requests: Mutex<u32>,
    request_error: Option<AuthError>,
    hang_polls: bool,
}

impl ScriptedDeviceEndpoint {
    pub fn new(session: DeviceAuthSession) -> Self {
        Self {
            session,
            polls: Mutex::new(VecDeque::new()),
            poll_calls: Mutex::new(0),
            code_requests: Mutex::new(0),
            request_error: None,
            hang_polls: false,
        }
    }

    /// Token polls never answer.
    pub fn hanging(session: DeviceAuthSession) -> Self {
        Self {
            hang_polls: true,
            ..Self::new(session)
        }
    }

    pub fn failing_request(err: AuthError) -> Self {
        Self {
            request_error: Some(err),
            ..Self::new(device_session(900, Some(5)))
        }
    }

    pub fn then(self, response: PollResponse) -> Self {
        self.polls
            .lock()
            .expect("script lock poisoned")
            .push_back(Ok(response));
        self
    }

    pub fn then_pending(self, times: usize) -> Self {
        (0..times).fold(self, |endpoint, _| endpoint.then(PollResponse::pending()))
    }

    pub fn then_err(self, err: AuthError) -> Self {
        self.polls
            .lock()
            .expect("script lock poisoned")
            .push_back(Err(err));
        self
    }

    pub fn poll_calls(&self) -> u32 {
        *self.poll_calls.lock().expect("script lock poisoned")
    }

    pub fn code_requests(&self) -> u32 {
        *self.code_requests.lock().expect("script lock poisoned")
    }
}

#[async_trait]
impl DeviceAuthorizationEndpoint for ScriptedDeviceEndpoint {
    async fn request_code(&self) -> Result<DeviceAuthSession, AuthError> {
        *self.code_requests.lock().expect("script lock poisoned") += 1;
        match &self.request_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.session.clone()),
        }
    }

    async fn poll_token(&self, _device_code: &str) -> Result<PollResponse, AuthError> {
        *self.poll_calls.lock().expect("script lock poisoned") += 1;
        if self.hang_polls {
            std::future::pending::<()>().await;
        }
        self.polls
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Ok(PollResponse::pending()))
    }
}

pub fn device_session(expires_in: u64, interval: Option<u64>) -> DeviceAuthSession {
    DeviceAuthSession {
        device_code: "device-code-1".to_string(),
        user_code: "WDJB-MJHT".to_string(),
        verification_uri: "https://example.com/device".to_string(),
        expires_in,
        interval,
    }
}

// ---------------------------------------------------------------------------
// Exchange / profile wiremock helpers
// ---------------------------------------------------------------------------

pub fn exchange_config(server: &MockServer) -> ExchangeConfig {
    ExchangeConfig {
        regional_url: format!("{}/user/authenticate", server.uri()),
        platform_url: format!("{}/xsts/authorize", server.uri()),
        session_url: format!("{}/authentication/login_with_xbox", server.uri()),
        ..ExchangeConfig::default()
    }
}

pub fn profile_config(server: &MockServer) -> ProfileConfig {
    ProfileConfig {
        url: format!("{}/minecraft/profile", server.uri()),
        timeout_secs: 5,
    }
}

pub fn regional_ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "IssueInstant": "2024-01-01T00:00:00Z",
        "NotAfter": "2024-01-15T00:00:00Z",
        "Token": "regional-token",
        "DisplayClaims": {"xui": [{"uhs": "user-hash"}]}
    }))
}

pub fn platform_ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "IssueInstant": "2024-01-01T00:00:00Z",
        "NotAfter": "2024-01-02T00:00:00Z",
        "Token": "platform-token",
        "DisplayClaims": {"xui": [{"uhs": "user-hash"}]}
    }))
}

pub fn session_ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "username": "00000000-0000-0000-0000-000000000000",
        "roles": [],
        "access_token": SESSION_TOKEN,
        "token_type": "Bearer",
        "expires_in": 86400
    }))
}

pub fn profile_ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "069a79f444e94726a5befca90e38aaf5",
        "name": "Notch",
        "skins": [{"id": "s1", "state": "ACTIVE", "url": "http://textures.example/notch", "variant": "CLASSIC"}],
        "capes": []
    }))
}

pub async fn mount_regional(server: &MockServer, response: ResponseTemplate, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/user/authenticate"))
        .respond_with(response)
        .expect(expected)
        .mount(server)
        .await;
}

pub async fn mount_platform(server: &MockServer, response: ResponseTemplate, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/xsts/authorize"))
        .respond_with(response)
        .expect(expected)
        .mount(server)
        .await;
}

pub async fn mount_session(server: &MockServer, response: ResponseTemplate, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/authentication/login_with_xbox"))
        .respond_with(response)
        .expect(expected)
        .mount(server)
        .await;
}

pub async fn mount_profile(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/minecraft/profile"))
        .respond_with(response)
        .mount(server)
        .await;
}

/// Mount all three hops answering successfully `expected` times each.
pub async fn mount_chain(server: &MockServer, expected: u64) {
    mount_regional(server, regional_ok(), expected).await;
    mount_platform(server, platform_ok(), expected).await;
    mount_session(server, session_ok(), expected).await;
}

pub fn fast_options() -> OrchestratorOptions {
    OrchestratorOptions::builder()
        .retry_delay(Duration::from_millis(10))
        .background_retry_interval(Duration::from_millis(50))
        .build()
}

pub fn orchestrator(
    server: &MockServer,
    provider: Arc<FakeConsumerProvider>,
    dir: &Path,
    options: OrchestratorOptions,
) -> AuthOrchestrator {
    orchestrator_with_exchanger(
        server,
        provider,
        dir,
        options,
        GameServiceTokenExchanger::new(exchange_config(server)),
    )
}

pub fn orchestrator_with_exchanger(
    server: &MockServer,
    provider: Arc<FakeConsumerProvider>,
    dir: &Path,
    options: OrchestratorOptions,
    exchanger: GameServiceTokenExchanger,
) -> AuthOrchestrator {
    let consumer = InteractiveConsumerIdentityClient::new(
        provider,
        TokenCache::new(dir.join("consumer-cache.bin")),
    );
    AuthOrchestrator::new(
        consumer,
        exchanger,
        ProfileCache::new(&profile_config(server)),
        options,
    )
}
