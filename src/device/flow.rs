//! Device Authorization Grant as an explicit, clock-driven state machine.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::endpoint::DeviceAuthorizationEndpoint;
use super::session::{DeviceAuthSession, DeviceFlowState, DeviceToken, PollResponse, SLOW_DOWN_INCREMENT};
use crate::auth::BrowserLauncher;
use crate::error::AuthError;
use crate::util::clock::Clock;
use crate::util::timeout::clamp_timeout;

/// Callback that shows the user code: `(user_code, verification_uri, expires_in_secs)`.
pub type ShowUserCode = Box<dyn FnOnce(&str, &str, u64) + Send>;

/// Outcome forced when the overall bound is hit.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    outcome: BoundOutcome,
}

#[derive(Debug, Clone, Copy)]
enum BoundOutcome {
    /// The caller's timeout ran out before the code expired.
    Cancelled,
    Expired,
}

impl BoundOutcome {
    fn state(self) -> DeviceFlowState {
        match self {
            Self::Cancelled => DeviceFlowState::Cancelled,
            Self::Expired => DeviceFlowState::Expired,
        }
    }
}

/// One run of the device flow.
///
/// Each [`DeviceFlow::step`] performs exactly one transition. Sleeping goes
/// through the injected [`Clock`], and every wait races the cancellation
/// token, so cancellation, timeout, and interval growth are observable
/// without wall-clock waits. A token poll that outlives the overall bound is
/// abandoned at the bound.
pub struct DeviceFlow {
    endpoint: Arc<dyn DeviceAuthorizationEndpoint>,
    clock: Arc<dyn Clock>,
    browser: Option<Arc<dyn BrowserLauncher>>,
    cancel: CancellationToken,
    timeout: Duration,
    show_user_code: Option<ShowUserCode>,
    state: DeviceFlowState,
    deadline: Option<Deadline>,
    polls: u32,
}

impl DeviceFlow {
    pub fn new(
        endpoint: Arc<dyn DeviceAuthorizationEndpoint>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
        cancel: CancellationToken,
        show_user_code: impl FnOnce(&str, &str, u64) + Send + 'static,
    ) -> Self {
        Self {
            endpoint,
            clock,
            browser: None,
            cancel,
            timeout: clamp_timeout(timeout),
            show_user_code: Some(Box::new(show_user_code)),
            state: DeviceFlowState::Requesting,
            deadline: None,
            polls: 0,
        }
    }

    /// Open the verification URI in a browser once the code is shown.
    pub fn with_browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn state(&self) -> &DeviceFlowState {
        &self.state
    }

    /// Token polls issued so far.
    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Drive the flow to a terminal state.
    pub async fn run(mut self) -> DeviceFlowState {
        while !self.state.is_terminal() {
            self.step().await;
        }
        self.state
    }

    /// Perform one transition. Terminal states are left untouched.
    pub async fn step(&mut self) -> &DeviceFlowState {
        if self.state.is_terminal() {
            return &self.state;
        }
        let current = std::mem::replace(&mut self.state, DeviceFlowState::Requesting);
        let next = if self.cancel.is_cancelled() {
            DeviceFlowState::Cancelled
        } else {
            match current {
                DeviceFlowState::Requesting => self.request().await,
                DeviceFlowState::AwaitingUser(session) => self.present(session),
                DeviceFlowState::Polling { session, interval } => {
                    self.poll(session, interval).await
                }
                terminal => terminal,
            }
        };
        tracing::debug!(state = next.name(), polls = self.polls, "Device flow transition");
        self.state = next;
        &self.state
    }

    async fn request(&mut self) -> DeviceFlowState {
        let endpoint = Arc::clone(&self.endpoint);
        tokio::select! {
            _ = self.cancel.cancelled() => DeviceFlowState::Cancelled,
            result = endpoint.request_code() => match result {
                Ok(session) => DeviceFlowState::AwaitingUser(session),
                Err(err) => failure(err),
            },
        }
    }

    fn present(&mut self, session: DeviceAuthSession) -> DeviceFlowState {
        if let Some(show) = self.show_user_code.take() {
            show(&session.user_code, &session.verification_uri, session.expires_in);
        }
        if let Some(browser) = &self.browser {
            if let Err(err) = browser.open(&session.verification_uri) {
                tracing::warn!(error = %err, "Could not open browser for device verification");
            }
        }

        let now = self.clock.now();
        let lifetime = session.lifetime();
        self.deadline = Some(if self.timeout < lifetime {
            Deadline {
                at: now + self.timeout,
                outcome: BoundOutcome::Cancelled,
            }
        } else {
            Deadline {
                at: now + lifetime,
                outcome: BoundOutcome::Expired,
            }
        });
        let interval = session.poll_interval();
        DeviceFlowState::Polling { session, interval }
    }

    async fn poll(&mut self, session: DeviceAuthSession, interval: Duration) -> DeviceFlowState {
        let Some(deadline) = self.deadline else {
            return DeviceFlowState::Failed {
                code: "invalid_state".to_string(),
                description: Some("polling started without a deadline".to_string()),
            };
        };

        let remaining = deadline.at.saturating_duration_since(self.clock.now());
        if remaining.is_zero() {
            return deadline.outcome.state();
        }
        let clock = Arc::clone(&self.clock);
        tokio::select! {
            _ = self.cancel.cancelled() => return DeviceFlowState::Cancelled,
            _ = clock.sleep(interval.min(remaining)) => {}
        }
        if self.clock.now() >= deadline.at {
            return deadline.outcome.state();
        }

        self.polls += 1;
        let endpoint = Arc::clone(&self.endpoint);
        let response = tokio::select! {
            _ = self.cancel.cancelled() => return DeviceFlowState::Cancelled,
            response = endpoint.poll_token(&session.device_code) => response,
            _ = clock.wait_until(deadline.at) => {
                tracing::debug!("Device flow bound reached during a token poll");
                return deadline.outcome.state();
            }
        };
        match response {
            Ok(response) => interpret(response, session, interval),
            Err(err) => DeviceFlowState::Failed {
                code: "network_error".to_string(),
                description: Some(err.to_string()),
            },
        }
    }
}

fn interpret(response: PollResponse, session: DeviceAuthSession, interval: Duration) -> DeviceFlowState {
    if let Some(access_token) = response.access_token.filter(|t| !t.is_empty()) {
        return DeviceFlowState::Succeeded(DeviceToken {
            access_token,
            token_type: response.token_type.unwrap_or_else(|| "bearer".to_string()),
            scope: response.scope,
        });
    }
    match response.error.as_deref() {
        Some("authorization_pending") => DeviceFlowState::Polling { session, interval },
        Some("slow_down") => {
            let interval = interval + SLOW_DOWN_INCREMENT;
            tracing::debug!(interval_secs = interval.as_secs(), "Device flow asked to slow down");
            DeviceFlowState::Polling { session, interval }
        }
        Some("access_denied") => DeviceFlowState::Denied,
        Some("expired_token") => DeviceFlowState::Expired,
        Some(code) => DeviceFlowState::Failed {
            code: code.to_string(),
            description: response.error_description,
        },
        None => DeviceFlowState::Failed {
            code: "invalid_response".to_string(),
            description: Some("token response carried neither a token nor an error".to_string()),
        },
    }
}

fn failure(err: AuthError) -> DeviceFlowState {
    match err {
        AuthError::OAuthDevice { code, description } => DeviceFlowState::Failed { code, description },
        AuthError::Network(_) | AuthError::NetworkTimeout { .. } => DeviceFlowState::Failed {
            code: "network_error".to_string(),
            description: Some(err.to_string()),
        },
        other => DeviceFlowState::Failed {
            code: "invalid_response".to_string(),
            description: Some(other.to_string()),
        },
    }
}
