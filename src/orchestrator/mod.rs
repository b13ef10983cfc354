//! The single entry point application code calls for game sign-in.

mod background;
mod state;

pub use state::{AuthEvent, AuthState, OrchestratorOptions};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::{
    ConsumerAccount, GameSessionToken, InteractiveConsumerIdentityClient, MsaIdentityProvider,
    SystemBrowser, TokenCache,
};
use crate::config::PortcullisConfig;
use crate::error::AuthError;
use crate::exchange::GameServiceTokenExchanger;
use crate::profile::{Profile, ProfileCache, ProfileLookup};
use crate::util::retry::{RetryFailure, RetryPolicy};

const EVENT_CAPACITY: usize = 64;

type SessionFuture = Shared<BoxFuture<'static, Result<GameSessionToken, AuthError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    SignIn,
    Refresh,
}

struct InFlight {
    id: u64,
    kind: JobKind,
    future: SessionFuture,
    abort: AbortHandle,
}

/// The guarded account/session slot. Exactly one sign-in or refresh job runs
/// at a time; `generation` moves on every sign-out so late job results from
/// an older session are dropped.
struct Slot {
    state: AuthState,
    account: Option<ConsumerAccount>,
    session: Option<GameSessionToken>,
    in_flight: Option<InFlight>,
    generation: u64,
    next_job: u64,
    background: Option<CancellationToken>,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            state: AuthState::SignedOut,
            account: None,
            session: None,
            in_flight: None,
            generation: 0,
            next_job: 0,
            background: None,
        }
    }
}

struct Inner {
    consumer: InteractiveConsumerIdentityClient,
    exchanger: GameServiceTokenExchanger,
    profiles: ProfileCache,
    options: OrchestratorOptions,
    slot: Mutex<Slot>,
    events: broadcast::Sender<AuthEvent>,
}

/// Coordinates interactive sign-in, silent refresh, sign-out, and the
/// background refresh loop.
///
/// Cheap to clone; clones share one session. Concurrent `sign_in` and
/// `ensure_valid_token` callers join the job already in flight instead of
/// starting another chain.
///
/// # Example
/// ```no_run
/// use portcullis::config::PortcullisConfig;
/// use portcullis::orchestrator::AuthOrchestrator;
///
/// # async fn run() -> portcullis::error::Result<()> {
/// let auth = AuthOrchestrator::from_config(&PortcullisConfig::load()?);
/// let profile = auth.sign_in().await?;
/// println!("Welcome, {}", profile.display_name);
/// let token = auth.ensure_valid_token().await?;
/// assert!(!token.is_expired());
/// auth.sign_out().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AuthOrchestrator {
    inner: Arc<Inner>,
}

impl AuthOrchestrator {
    pub fn new(
        consumer: InteractiveConsumerIdentityClient,
        exchanger: GameServiceTokenExchanger,
        profiles: ProfileCache,
        options: OrchestratorOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                consumer,
                exchanger,
                profiles,
                options,
                slot: Mutex::new(Slot::default()),
                events,
            }),
        }
    }

    /// Wire the bundled provider, token cache, exchanger, and profile cache.
    ///
    /// Configuration problems (such as a missing client id) surface from the
    /// first `sign_in`, which then enters [`AuthState::Error`].
    pub fn from_config(config: &PortcullisConfig) -> Self {
        let provider = MsaIdentityProvider::new(config.consumer.clone(), Arc::new(SystemBrowser));
        let consumer = InteractiveConsumerIdentityClient::new(
            Arc::new(provider),
            TokenCache::new(config.token_cache_path()),
        );
        let options = OrchestratorOptions::builder()
            .sign_in_attempts(config.orchestrator.sign_in_attempts)
            .retry_delay(Duration::from_millis(config.orchestrator.retry_delay_ms))
            .background_retry_interval(Duration::from_secs(config.orchestrator.background_retry_secs))
            .scopes(config.consumer.scopes.clone())
            .build();
        Self::new(
            consumer,
            GameServiceTokenExchanger::new(config.exchange.clone()),
            ProfileCache::new(&config.profile),
            options,
        )
    }

    pub fn state(&self) -> AuthState {
        self.inner.slot().state.clone()
    }

    pub fn is_signed_in(&self) -> bool {
        let slot = self.inner.slot();
        slot.session.is_some()
            && matches!(
                slot.state,
                AuthState::SignedIn { .. } | AuthState::RefreshingSilently
            )
    }

    pub fn current_account(&self) -> Option<ConsumerAccount> {
        self.inner.slot().account.clone()
    }

    /// Account persisted in the token cache, which may predate this process.
    pub async fn cached_account(&self) -> Result<Option<ConsumerAccount>, AuthError> {
        Ok(self.inner.consumer.list_accounts().await?.into_iter().next())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    /// Interactive sign-in through the full chain, retried as a whole.
    ///
    /// Returns the signed-in profile. After the last failed attempt the
    /// cached account is removed, the state returns to `SignedOut`, and the
    /// error is [`AuthError::SignInFailed`].
    pub async fn sign_in(&self) -> Result<Profile, AuthError> {
        let pending = {
            let mut slot = self.inner.slot();
            if let AuthState::Error(cause) = &slot.state {
                return Err(cause.clone());
            }
            if slot.in_flight.is_none() && matches!(slot.state, AuthState::SignedIn { .. }) {
                None
            } else {
                Some(self.inner.join_or_start(&mut slot, JobKind::SignIn))
            }
        };
        let Some((job, kind)) = pending else {
            return self.profile().await;
        };

        let result = job.await;
        if kind == JobKind::Refresh && result.is_err() {
            let (job, _) = {
                let mut slot = self.inner.slot();
                self.inner.join_or_start(&mut slot, JobKind::SignIn)
            };
            job.await?;
        } else {
            result?;
        }
        self.profile().await
    }

    /// Fresh session token via silent refresh + the full chain.
    ///
    /// A transient failure keeps the cached account; any other failure forces
    /// `SignedOut` and removes it. Never retried here.
    pub async fn ensure_valid_token(&self) -> Result<GameSessionToken, AuthError> {
        let (job, _) = {
            let mut slot = self.inner.slot();
            if let AuthState::Error(cause) = &slot.state {
                return Err(cause.clone());
            }
            self.inner.join_or_start(&mut slot, JobKind::Refresh)
        };
        job.await
    }

    /// Cached profile, fetched lazily for the current session.
    ///
    /// `ProfileChanged` is emitted only when the profile was actually
    /// fetched. A 401 from the profile endpoint drops the session and moves
    /// to `SignedOut`.
    pub async fn profile(&self) -> Result<Profile, AuthError> {
        self.inner.load_profile().await
    }

    /// Drop the session and cached account. Never fails.
    ///
    /// Aborts any in-flight job, stops the background loop, and resets an
    /// `Error` state.
    pub async fn sign_out(&self) {
        let (account, in_flight, background) = {
            let mut slot = self.inner.slot();
            slot.generation += 1;
            slot.state = AuthState::SignedOut;
            slot.session = None;
            (
                slot.account.take(),
                slot.in_flight.take(),
                slot.background.take(),
            )
        };
        if let Some(job) = in_flight {
            tracing::debug!(kind = ?job.kind, "Aborting in-flight auth job");
            job.abort.abort();
        }
        if let Some(background) = background {
            background.cancel();
        }
        self.inner.profiles.clear().await;

        let accounts = match account {
            Some(account) => vec![account],
            None => self.inner.consumer.list_accounts().await.unwrap_or_default(),
        };
        for account in accounts {
            if let Err(err) = self.inner.consumer.remove_account(&account).await {
                tracing::warn!(error = %err, "Failed to remove cached account during sign-out");
            }
        }
        tracing::info!("Signed out");
        self.inner.emit(AuthEvent::StateChanged(AuthState::SignedOut));
        self.inner.emit(AuthEvent::ProfileChanged(None));
    }
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    async fn load_profile(&self) -> Result<Profile, AuthError> {
        match self.profiles.lookup().await {
            Ok(ProfileLookup { profile, fetched }) => {
                if fetched {
                    self.emit(AuthEvent::ProfileChanged(Some(profile.clone())));
                }
                Ok(profile)
            }
            Err(AuthError::NotSignedIn) => {
                self.drop_rejected_session();
                Err(AuthError::NotSignedIn)
            }
            Err(err) => Err(err),
        }
    }

    /// The game backend no longer accepts the held session token. The cached
    /// account stays on disk so a later silent refresh can recover.
    fn drop_rejected_session(&self) {
        {
            let mut slot = self.slot();
            if slot.session.take().is_none() {
                return;
            }
            slot.account = None;
            slot.state = AuthState::SignedOut;
        }
        tracing::info!("Session token rejected by the profile endpoint; signed out");
        self.emit(AuthEvent::StateChanged(AuthState::SignedOut));
        self.emit(AuthEvent::ProfileChanged(None));
    }

    fn is_current(&self, generation: u64) -> bool {
        self.slot().generation == generation
    }

    fn join_or_start(self: &Arc<Self>, slot: &mut Slot, kind: JobKind) -> (SessionFuture, JobKind) {
        if let Some(job) = &slot.in_flight {
            return (job.future.clone(), job.kind);
        }
        slot.next_job += 1;
        let id = slot.next_job;
        let generation = slot.generation;
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            match kind {
                JobKind::SignIn => inner.sign_in_job(id, generation).await,
                JobKind::Refresh => inner.refresh_job(id, generation).await,
            }
        });
        let abort = handle.abort_handle();
        let future = async move {
            match handle.await {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => Err(AuthError::Cancelled),
                Err(err) => Err(AuthError::Io(format!("auth task failed: {err}"))),
            }
        }
        .boxed()
        .shared();
        slot.in_flight = Some(InFlight {
            id,
            kind,
            future: future.clone(),
            abort,
        });
        (future, kind)
    }

    /// Move to `state` if the job's generation is still current.
    fn set_state(&self, generation: u64, state: AuthState) {
        {
            let mut slot = self.slot();
            if slot.generation != generation {
                return;
            }
            slot.state = state.clone();
        }
        self.emit(AuthEvent::StateChanged(state));
    }

    /// Release the slot held by job `id` and apply its result when the
    /// generation is still current. Returns whether it was applied.
    fn finish(
        &self,
        id: u64,
        generation: u64,
        apply: impl FnOnce(&mut Slot) -> Option<AuthState>,
    ) -> bool {
        let changed = {
            let mut slot = self.slot();
            if slot.in_flight.as_ref().map(|job| job.id) == Some(id) {
                slot.in_flight = None;
            }
            if slot.generation != generation {
                return false;
            }
            let next = apply(&mut slot);
            if let Some(state) = &next {
                slot.state = state.clone();
            }
            next
        };
        if let Some(state) = changed {
            self.emit(AuthEvent::StateChanged(state));
        }
        true
    }

    async fn sign_in_job(self: Arc<Self>, id: u64, generation: u64) -> Result<GameSessionToken, AuthError> {
        let policy = RetryPolicy::fixed(self.options.sign_in_attempts, self.options.retry_delay);
        let result = policy
            .execute(|attempt| {
                let inner = Arc::clone(&self);
                async move {
                    inner.set_state(generation, AuthState::SigningIn { attempt });
                    inner.sign_in_attempt().await.map_err(|err| {
                        tracing::warn!(
                            attempt,
                            hop = ?err.failed_hop(),
                            error = %err,
                            "Sign-in attempt failed"
                        );
                        err
                    })
                }
            })
            .await;

        match result {
            Ok((account, session)) => {
                self.profiles.init(session.clone()).await;
                let applied = self.finish(id, generation, |slot| {
                    slot.account = Some(account.clone());
                    slot.session = Some(session.clone());
                    Some(AuthState::SignedIn {
                        account: account.clone(),
                    })
                });
                if !applied {
                    self.profiles.clear().await;
                    return Err(AuthError::Cancelled);
                }
                tracing::info!(account_id = %account.account_id, "Signed in");
                Ok(session)
            }
            Err(RetryFailure {
                last_error: err @ AuthError::Configuration(_),
                ..
            }) => {
                tracing::error!(error = %err, "Sign-in is misconfigured");
                self.finish(id, generation, |_| Some(AuthState::Error(err.clone())));
                Err(err)
            }
            Err(RetryFailure {
                attempts,
                last_error,
            }) => {
                tracing::warn!(attempts, error = %last_error, "Sign-in failed; clearing cached account");
                if self.is_current(generation) {
                    self.remove_cached_accounts().await;
                }
                self.finish(id, generation, |slot| {
                    slot.account = None;
                    slot.session = None;
                    Some(AuthState::SignedOut)
                });
                Err(AuthError::SignInFailed {
                    attempts,
                    last: Box::new(last_error),
                })
            }
        }
    }

    /// One whole attempt. Nothing from an earlier attempt is reused.
    async fn sign_in_attempt(&self) -> Result<(ConsumerAccount, GameSessionToken), AuthError> {
        let scopes = &self.options.scopes;
        let account = self.consumer.sign_in_interactive(scopes).await?;
        let consumer_token = self.consumer.refresh_silently(&account, scopes).await?;
        let session = self.exchanger.exchange(&consumer_token).await?;
        Ok((account, session))
    }

    async fn refresh_job(self: Arc<Self>, id: u64, generation: u64) -> Result<GameSessionToken, AuthError> {
        let (held, previous) = {
            let slot = self.slot();
            (slot.account.clone(), slot.state.clone())
        };
        let account = match held.clone() {
            Some(account) => account,
            None => match self.consumer.list_accounts().await {
                Ok(accounts) => match accounts.into_iter().next() {
                    Some(account) => account,
                    None => {
                        self.finish(id, generation, |_| None);
                        return Err(AuthError::NotSignedIn);
                    }
                },
                Err(err) => {
                    self.finish(id, generation, |_| None);
                    return Err(err);
                }
            },
        };

        self.set_state(generation, AuthState::RefreshingSilently);
        let result = async {
            let consumer_token = self
                .consumer
                .refresh_silently(&account, &self.options.scopes)
                .await?;
            self.exchanger.exchange(&consumer_token).await
        }
        .await;

        match result {
            Ok(session) => {
                if held.as_ref() == Some(&account) {
                    self.profiles.update_token(session.clone()).await;
                } else {
                    self.profiles.init(session.clone()).await;
                }
                let applied = self.finish(id, generation, |slot| {
                    slot.account = Some(account.clone());
                    slot.session = Some(session.clone());
                    Some(AuthState::SignedIn {
                        account: account.clone(),
                    })
                });
                if !applied {
                    self.profiles.clear().await;
                    return Err(AuthError::Cancelled);
                }
                tracing::debug!("Session refreshed silently");
                self.emit(AuthEvent::SessionRefreshed {
                    expires_at: session.expires_at,
                });
                Ok(session)
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(
                    hop = ?err.failed_hop(),
                    error = %err,
                    "Silent refresh failed transiently; keeping cached account"
                );
                self.finish(id, generation, |_| Some(previous));
                Err(err)
            }
            Err(err) => {
                tracing::warn!(
                    hop = ?err.failed_hop(),
                    error = %err,
                    "Silent refresh rejected; signing out"
                );
                if self.is_current(generation) {
                    self.remove_cached_accounts().await;
                    self.profiles.clear().await;
                }
                self.finish(id, generation, |slot| {
                    slot.account = None;
                    slot.session = None;
                    Some(AuthState::SignedOut)
                });
                Err(err)
            }
        }
    }

    async fn remove_cached_accounts(&self) {
        let accounts = match self.consumer.list_accounts().await {
            Ok(accounts) => accounts,
            Err(err) => {
                tracing::warn!(error = %err, "Could not read cached accounts");
                return;
            }
        };
        for account in accounts {
            if let Err(err) = self.consumer.remove_account(&account).await {
                tracing::warn!(error = %err, "Failed to remove cached account");
            }
        }
    }
}
