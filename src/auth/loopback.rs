//! One-shot localhost server that receives the OAuth redirect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use crate::error::{AuthError, InteractiveFailure};

const SUCCESS_HTML: &str =
    "<html><body><h1>Signed in</h1><p>You may close this window and return to the application.</p></body></html>";
const ERROR_HTML: &str =
    "<html><body><h1>Sign-in failed</h1><p>You may close this window and try again.</p></body></html>";

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RedirectParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

struct CallbackState {
    expected_state: String,
    result_tx: mpsc::Sender<RedirectParams>,
}

#[derive(Debug)]
pub struct LoopbackListener {
    listener: TcpListener,
    port: u16,
}

impl LoopbackListener {
    /// Bind on 127.0.0.1; port 0 picks a free port.
    pub async fn bind(port: u16) -> Result<Self, AuthError> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.map_err(|e| {
            AuthError::InteractiveAuth(InteractiveFailure::BrowserFailed(format!(
                "redirect listener bind failed: {e}"
            )))
        })?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Serve until a redirect carrying `code` or `error` and the expected
    /// `state` arrives, or `timeout` elapses.
    ///
    /// Everything else (favicon, preconnect, a forged or stale `state`) gets a
    /// 404 and the server keeps waiting.
    pub async fn wait_for_redirect(
        self,
        expected_state: &str,
        timeout: Duration,
    ) -> Result<RedirectParams, AuthError> {
        let (result_tx, mut result_rx) = mpsc::channel::<RedirectParams>(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = Arc::new(CallbackState {
            expected_state: expected_state.to_string(),
            result_tx,
        });
        let app = Router::new()
            .route("/", get(handle_redirect))
            .fallback(|| async { StatusCode::NOT_FOUND })
            .with_state(state);

        let server = axum::serve(self.listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        tokio::spawn(async move {
            if let Err(e) = server.await {
                tracing::warn!(error = %e, "Redirect listener stopped with an error");
            }
        });

        let result = tokio::select! {
            Some(params) = result_rx.recv() => Ok(params),
            _ = tokio::time::sleep(timeout) => Err(AuthError::InteractiveAuth(
                InteractiveFailure::BrowserFailed(format!(
                    "no redirect received within {}s",
                    timeout.as_secs()
                )),
            )),
        };
        let _ = shutdown_tx.send(());
        result
    }
}

async fn handle_redirect(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<RedirectParams>,
) -> (StatusCode, Html<&'static str>) {
    if params.code.is_none() && params.error.is_none() {
        return (StatusCode::NOT_FOUND, Html(""));
    }
    if params.state.as_deref() != Some(state.expected_state.as_str()) {
        tracing::debug!("Ignoring redirect with unexpected state");
        return (StatusCode::NOT_FOUND, Html(""));
    }
    let failed = params.error.is_some();
    let _ = state.result_tx.send(params).await;
    if failed {
        (StatusCode::BAD_REQUEST, Html(ERROR_HTML))
    } else {
        (StatusCode::OK, Html(SUCCESS_HTML))
    }
}
