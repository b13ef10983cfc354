//! Seam between the sign-in pipeline and a consumer identity provider.

use async_trait::async_trait;

use super::token::{ConsumerAccount, ConsumerSignIn, ConsumerToken};
use crate::error::AuthError;

/// Consumer identity provider with an exportable in-memory token cache.
///
/// Implementations own the refresh material for at most one account. The
/// cache hooks let [`super::TokenCache`] hydrate the provider before every
/// access and persist it only when `has_state_changed` reports a change.
#[async_trait]
pub trait ConsumerIdentityProvider: Send + Sync {
    /// Run the interactive browser sign-in.
    ///
    /// Fails with [`AuthError::InteractiveAuth`] on user cancellation, a
    /// browser failure, or an OAuth error from the provider.
    async fn acquire_interactive(&self, scopes: &[String]) -> Result<ConsumerSignIn, AuthError>;

    /// Obtain a fresh access token for a cached account without user interaction.
    ///
    /// A provider rejection surfaces as [`AuthError::SilentRefresh`];
    /// connectivity problems surface as `Network`/`NetworkTimeout`.
    async fn acquire_silent(
        &self,
        account: &ConsumerAccount,
        scopes: &[String],
    ) -> Result<ConsumerToken, AuthError>;

    fn accounts(&self) -> Vec<ConsumerAccount>;

    fn remove_account(&self, account: &ConsumerAccount);

    /// Serialize the cache and mark it as persisted.
    fn export_cache(&self) -> Result<Vec<u8>, AuthError>;

    /// Replace the in-memory cache with a previously exported blob.
    fn import_cache(&self, blob: &[u8]) -> Result<(), AuthError>;

    fn has_state_changed(&self) -> bool;
}
