//! Ways of getting an authorization code out of the operator.

use std::collections::HashMap;
use std::io::BufRead;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{CredentialResolutionError, Result};

/// Google authorization codes start with this.
pub const GOOGLE_CODE_PREFIX: &str = "4/";

const SUCCESS_PAGE: &str = "<html><body><h2>Authorization complete.</h2>\
<p>You can close this window and return to the terminal.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h2>Authorization failed.</h2>\
<p>Check the terminal for details.</p></body></html>";
const WAITING_PAGE: &str = "<html><body><p>Waiting for the authorization redirect.</p></body></html>";

#[async_trait]
pub trait CodeReceiver: Send + Sync {
    /// Redirect URI registered in the authorization request.
    fn redirect_uri(&self) -> String;

    /// Present `authorization_url` to the operator and return the code.
    async fn receive_code(&self, authorization_url: &Url, state: &str) -> Result<String>;
}

/// Random value for the OAuth `state` parameter.
pub fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Query parameters of the redirect back from the provider.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl CallbackParams {
    fn from_pairs(pairs: HashMap<String, String>) -> Self {
        Self {
            code: pairs.get("code").cloned(),
            state: pairs.get("state").cloned(),
            error: pairs.get("error").cloned(),
        }
    }

    fn is_empty(&self) -> bool {
        self.code.is_none() && self.error.is_none()
    }

    /// Check state, surface provider errors, and return the code.
    pub fn into_code(self, expected_state: &str) -> Result<String> {
        if let Some(error) = self.error {
            return Err(CredentialResolutionError::AuthorizationAborted(format!(
                "provider returned error '{}'",
                error
            )));
        }
        if let Some(state) = &self.state {
            if state != expected_state {
                return Err(CredentialResolutionError::AuthorizationAborted(
                    "state parameter mismatch".into(),
                ));
            }
        }
        self.code.filter(|c| !c.trim().is_empty()).ok_or_else(|| {
            CredentialResolutionError::AuthorizationAborted(
                "redirect did not contain an authorization code".into(),
            )
        })
    }
}

/// Pull the authorization code out of whatever the operator pasted.
///
/// Accepts a full redirect URL, a bare query string, or a raw code starting
/// with [`GOOGLE_CODE_PREFIX`].
pub fn extract_authorization_code(input: &str, expected_state: &str) -> Result<String> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CredentialResolutionError::AuthorizationAborted(
            "no authorization code entered".into(),
        ));
    }

    let query = match Url::parse(input) {
        Ok(url) => url.query().map(str::to_string),
        Err(_) => match input.split_once('?') {
            Some((_, query)) => Some(query.to_string()),
            None if input.contains("code=") || input.contains("error=") => Some(input.to_string()),
            None => None,
        },
    };

    if let Some(query) = query {
        let pairs: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        let params = CallbackParams::from_pairs(pairs);
        if !params.is_empty() {
            return params.into_code(expected_state);
        }
    }

    if input.starts_with(GOOGLE_CODE_PREFIX) {
        return Ok(input.to_string());
    }

    Err(CredentialResolutionError::AuthorizationAborted(
        "input is neither a redirect URL with a 'code' parameter nor an authorization code".into(),
    ))
}

// ---------------------------------------
// Loopback listener + browser
// ---------------------------------------

#[derive(Clone)]
struct CallbackState {
    tx: Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>,
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    if params.is_empty() {
        return Html(WAITING_PAGE);
    }
    let failed = params.error.is_some();
    if let Some(tx) = state.tx.lock().await.take() {
        let _ = tx.send(params);
    }
    Html(if failed { FAILURE_PAGE } else { SUCCESS_PAGE })
}

/// Local HTTP listener that catches the provider's redirect.
#[derive(Debug, Clone)]
pub struct LoopbackReceiver {
    port: u16,
    open_browser: bool,
    timeout: Option<Duration>,
}

impl LoopbackReceiver {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            open_browser: true,
            timeout: None,
        }
    }

    pub fn open_browser(mut self, enabled: bool) -> Self {
        self.open_browser = enabled;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// `localhost` may resolve to either loopback family, so listen on both.
    /// IPv4 is required; IPv6 is best effort.
    async fn bind_loopback(&self) -> Result<Vec<TcpListener>> {
        let v4 = TcpListener::bind((Ipv4Addr::LOCALHOST, self.port))
            .await
            .map_err(|e| {
                CredentialResolutionError::Listener(format!(
                    "cannot listen on port {}: {}",
                    self.port, e
                ))
            })?;
        let mut listeners = vec![v4];
        match TcpListener::bind((Ipv6Addr::LOCALHOST, self.port)).await {
            Ok(v6) => listeners.push(v6),
            Err(e) => debug!(port = self.port, error = %e, "no IPv6 loopback listener"),
        }
        Ok(listeners)
    }
}

#[async_trait]
impl CodeReceiver for LoopbackReceiver {
    fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/", self.port)
    }

    async fn receive_code(&self, authorization_url: &Url, state: &str) -> Result<String> {
        let (tx, rx) = oneshot::channel::<CallbackParams>();
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let app = Router::new()
            .route("/", get(handle_callback))
            .with_state(CallbackState {
                tx: Arc::new(Mutex::new(Some(tx))),
            });

        let mut servers = Vec::new();
        for listener in self.bind_loopback().await? {
            let app = app.clone();
            let mut shutdown = shutdown_rx.clone();
            servers.push(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.changed().await;
                    })
                    .await
            }));
        }
        debug!(port = self.port, "callback listener started");

        eprintln!(
            "Please visit this URL to authorize this application:\n\n{}\n",
            authorization_url
        );
        if self.open_browser {
            match open::that(authorization_url.as_str()) {
                Ok(()) => info!("opened browser for authorization"),
                Err(e) => warn!(error = %e, "could not open a browser; open the URL manually"),
            }
        }

        let received = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, rx).await.map_err(|_| {
                CredentialResolutionError::AuthorizationAborted(format!(
                    "no authorization callback received within {}s",
                    limit.as_secs()
                ))
            }),
            None => Ok(rx.await),
        };

        let _ = shutdown_tx.send(());
        for server in servers {
            let _ = tokio::time::timeout(Duration::from_secs(2), server).await;
        }

        let params = received?.map_err(|_| {
            CredentialResolutionError::AuthorizationAborted("callback listener closed".into())
        })?;
        params.into_code(state)
    }
}

// ---------------------------------------
// Manual / headless console flow
// ---------------------------------------

/// Source of operator input for the manual flow.
pub trait LineSource: Send + Sync {
    fn read_line(&self) -> std::io::Result<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdinLines;

impl LineSource for StdinLines {
    fn read_line(&self) -> std::io::Result<String> {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    }
}

pub struct ManualReceiver {
    redirect_uri: String,
    input: Arc<dyn LineSource>,
}

impl ManualReceiver {
    pub fn new(redirect_uri: impl Into<String>) -> Self {
        Self::with_input(redirect_uri, StdinLines)
    }

    pub fn with_input(redirect_uri: impl Into<String>, input: impl LineSource + 'static) -> Self {
        Self {
            redirect_uri: redirect_uri.into(),
            input: Arc::new(input),
        }
    }
}

#[async_trait]
impl CodeReceiver for ManualReceiver {
    fn redirect_uri(&self) -> String {
        self.redirect_uri.clone()
    }

    async fn receive_code(&self, authorization_url: &Url, state: &str) -> Result<String> {
        eprintln!(
            "Open this URL in a browser and approve access:\n\n{}\n\n\
             The browser will then fail to load a localhost page. Copy the full URL \
             from its address bar (or just the code) and paste it here:",
            authorization_url
        );

        let input = Arc::clone(&self.input);
        let line = tokio::task::spawn_blocking(move || input.read_line())
            .await
            .map_err(|e| CredentialResolutionError::AuthorizationAborted(format!("input task failed: {}", e)))?
            .map_err(|e| CredentialResolutionError::AuthorizationAborted(format!("cannot read input: {}", e)))?;

        extract_authorization_code(&line, state)
    }
}
