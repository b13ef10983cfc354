//! Opportunistic silent sign-in on startup.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::AuthOrchestrator;
use crate::error::{AuthError, ErrorCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sweep {
    Done,
    Retry,
}

impl AuthOrchestrator {
    /// Spawn the background refresh loop.
    ///
    /// Each sweep picks the first cached account, runs
    /// [`AuthOrchestrator::ensure_valid_token`], and populates the profile
    /// cache. A failed sweep is repeated after the configured interval until
    /// one succeeds, no cached account is left, `shutdown` fires, or
    /// [`AuthOrchestrator::sign_out`] runs. Only one loop runs at a time.
    pub fn spawn_background_refresh(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let cancel = shutdown.child_token();
        {
            let mut slot = self.inner.slot();
            if let Some(previous) = slot.background.replace(cancel.clone()) {
                previous.cancel();
            }
        }
        let orchestrator = self.clone();
        let interval = self.inner.options.background_retry_interval;
        tokio::spawn(async move {
            let mut sweep_no: u32 = 0;
            loop {
                sweep_no += 1;
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => return,
                    outcome = orchestrator.sweep() => outcome,
                };
                if outcome == Sweep::Done {
                    tracing::debug!(sweeps = sweep_no, "Background refresh finished");
                    return;
                }
                tracing::info!(
                    retry_in_secs = interval.as_secs(),
                    "Background refresh will retry"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        })
    }

    async fn sweep(&self) -> Sweep {
        match self.inner.consumer.list_accounts().await {
            Ok(accounts) if accounts.is_empty() => {
                tracing::debug!("No cached account; skipping background refresh");
                return Sweep::Done;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "Could not read cached accounts");
                return Sweep::Retry;
            }
        }

        match self.ensure_valid_token().await {
            Ok(_) => {
                if let Err(err) = self.inner.load_profile().await {
                    tracing::warn!(error = %err, "Background profile fetch failed");
                }
                Sweep::Done
            }
            Err(AuthError::Cancelled) => Sweep::Done,
            Err(err) if err.category() == ErrorCategory::Configuration => {
                tracing::error!(error = %err, "Background refresh stopped");
                Sweep::Done
            }
            Err(err) => {
                tracing::warn!(
                    hop = ?err.failed_hop(),
                    error = %err,
                    "Background refresh failed"
                );
                Sweep::Retry
            }
        }
    }
}
