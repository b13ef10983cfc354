use std::sync::Arc;

use tokio::sync::Mutex;

use super::cache::TokenCache;
use super::provider::ConsumerIdentityProvider;
use super::token::{ConsumerAccount, ConsumerToken};
use crate::error::AuthError;

/// Interactive sign-in and silent refresh against the consumer identity tenant.
///
/// Owns the single cached account. Every call loads the token cache into the
/// provider first and writes it back only after the provider call succeeded,
/// so a failed or interrupted flow never touches the file. Cache file I/O runs
/// on the blocking pool.
///
/// `gate` is held from load through save, so one call can never re-import
/// the file over state another call has not written back yet.
#[derive(Clone)]
pub struct InteractiveConsumerIdentityClient {
    provider: Arc<dyn ConsumerIdentityProvider>,
    cache: TokenCache,
    gate: Arc<Mutex<()>>,
}

impl InteractiveConsumerIdentityClient {
    pub fn new(provider: Arc<dyn ConsumerIdentityProvider>, cache: TokenCache) -> Self {
        Self {
            provider,
            cache,
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    pub async fn sign_in_interactive(&self, scopes: &[String]) -> Result<ConsumerAccount, AuthError> {
        let _guard = self.gate.lock().await;
        self.load().await?;
        let signed_in = self.provider.acquire_interactive(scopes).await?;
        tracing::info!(
            account_id = %signed_in.account.account_id,
            "Interactive consumer sign-in completed"
        );
        self.save().await;
        Ok(signed_in.account)
    }

    /// Fresh consumer access token for a cached account.
    ///
    /// A [`AuthError::SilentRefresh`] means interactive sign-in is required;
    /// callers must not retry it.
    pub async fn refresh_silently(
        &self,
        account: &ConsumerAccount,
        scopes: &[String],
    ) -> Result<ConsumerToken, AuthError> {
        let _guard = self.gate.lock().await;
        self.load().await?;
        let token = self.provider.acquire_silent(account, scopes).await?;
        self.save().await;
        Ok(token)
    }

    /// Zero or one cached account.
    pub async fn list_accounts(&self) -> Result<Vec<ConsumerAccount>, AuthError> {
        let _guard = self.gate.lock().await;
        self.load().await?;
        Ok(self.provider.accounts().into_iter().take(1).collect())
    }

    pub async fn remove_account(&self, account: &ConsumerAccount) -> Result<(), AuthError> {
        let _guard = self.gate.lock().await;
        self.load().await?;
        self.provider.remove_account(account);
        let provider = Arc::clone(&self.provider);
        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || cache.save_if_changed(provider.as_ref()))
            .await
            .map_err(|e| AuthError::Io(format!("token cache task failed: {e}")))??;
        Ok(())
    }

    async fn load(&self) -> Result<bool, AuthError> {
        let provider = Arc::clone(&self.provider);
        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || cache.load_into(provider.as_ref()))
            .await
            .map_err(|e| AuthError::Io(format!("token cache task failed: {e}")))?
    }

    /// A failed save leaves the previous file in place; the fresh token is
    /// still usable for this process, so the failure is only logged.
    async fn save(&self) {
        let provider = Arc::clone(&self.provider);
        let cache = self.cache.clone();
        let result = tokio::task::spawn_blocking(move || cache.save_if_changed(provider.as_ref()))
            .await
            .map_err(|e| AuthError::Io(format!("token cache task failed: {e}")))
            .and_then(|inner| inner);
        if let Err(err) = result {
            tracing::warn!(
                path = %self.cache.path().display(),
                error = %err,
                "Failed to persist token cache"
            );
        }
    }
}
