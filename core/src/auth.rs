use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::Shared;
use parking_lot::Mutex;
use parking_lot::RwLock;
use reqwest::header::COOKIE;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Cookie name the backend reads the session from.
pub const SESSION_COOKIE: &str = "access_token";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn cookie_header(&self) -> String {
        format!("{SESSION_COOKIE}={}", self.access_token)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Debug, Default)]
struct SessionState {
    credentials: Option<Credentials>,
    revoked: bool,
}

/// Shared handle to the credentials the transport attaches to each request.
/// Once revoked (after an unrecoverable auth failure) the session stays
/// closed until new credentials are installed.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    inner: Arc<RwLock<SessionState>>,
}

impl CredentialStore {
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(SessionState {
                credentials,
                revoked: false,
            })),
        }
    }

    pub fn get(&self) -> Option<Credentials> {
        self.inner.read().credentials.clone()
    }

    pub fn install(&self, credentials: Credentials) {
        let mut state = self.inner.write();
        state.credentials = Some(credentials);
        state.revoked = false;
    }

    /// Ends the session. Returns `false` when it had already ended.
    pub fn revoke(&self) -> bool {
        let mut state = self.inner.write();
        state.credentials = None;
        !std::mem::replace(&mut state.revoked, true)
    }

    pub fn is_revoked(&self) -> bool {
        self.inner.read().revoked
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("no refresh credential available")]
    MissingCredentials,
    #[error("refresh endpoint rejected the session")]
    Rejected,
    #[error("refresh request failed: {0}")]
    Transport(String),
    #[error("refresh timed out")]
    Timeout,
}

/// External collaborator that exchanges the current session for a new one.
#[async_trait]
pub trait RefreshEndpoint: Send + Sync {
    async fn refresh(&self, current: Option<Credentials>) -> Result<Credentials, RefreshError>;
}

/// Refresh endpoint used when no refresh URL is configured: every refresh
/// fails, which turns an auth error into a terminal sign-out.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRefresh;

#[async_trait]
impl RefreshEndpoint for NoRefresh {
    async fn refresh(&self, _current: Option<Credentials>) -> Result<Credentials, RefreshError> {
        Err(RefreshError::MissingCredentials)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    success: bool,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Refresh route exposed by the web proxy: POST with the refresh token,
/// answering `{success, accessToken?, refreshToken?}`.
#[derive(Debug, Clone)]
pub struct HttpRefreshEndpoint {
    client: reqwest::Client,
    url: String,
}

impl HttpRefreshEndpoint {
    pub fn new(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl RefreshEndpoint for HttpRefreshEndpoint {
    async fn refresh(&self, current: Option<Credentials>) -> Result<Credentials, RefreshError> {
        let refresh_token = current
            .as_ref()
            .and_then(|credentials| credentials.refresh_token.clone())
            .ok_or(RefreshError::MissingCredentials)?;

        let response = self
            .client
            .post(&self.url)
            .header(COOKIE, format!("refresh_token={refresh_token}"))
            .json(&RefreshRequest {
                refresh_token: refresh_token.clone(),
            })
            .send()
            .await
            .map_err(|err| RefreshError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            debug!(status = %response.status(), "refresh endpoint returned an error status");
            return Err(RefreshError::Rejected);
        }
        let body = response
            .json::<RefreshResponse>()
            .await
            .map_err(|err| RefreshError::Transport(err.to_string()))?;
        match (body.success, body.access_token) {
            (true, Some(access_token)) => Ok(Credentials {
                access_token,
                refresh_token: body.refresh_token.or(Some(refresh_token)),
            }),
            _ => Err(RefreshError::Rejected),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Identifies the refresh attempt; every caller that joined the same
    /// attempt observes the same ticket.
    pub ticket: u64,
    pub refreshed: bool,
}

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Single-flight credential refresh. Concurrent callers join the refresh
/// already in flight instead of issuing their own. Performs no sign-out;
/// callers decide what a failed refresh means.
pub struct TokenRefresher {
    endpoint: Arc<dyn RefreshEndpoint>,
    credentials: CredentialStore,
    timeout: Duration,
    inflight: Arc<Mutex<Option<SharedRefresh>>>,
    next_ticket: AtomicU64,
}

impl TokenRefresher {
    pub fn new(
        endpoint: Arc<dyn RefreshEndpoint>,
        credentials: CredentialStore,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            credentials,
            timeout,
            inflight: Arc::new(Mutex::new(None)),
            next_ticket: AtomicU64::new(0),
        }
    }

    pub async fn refresh(&self) -> RefreshOutcome {
        let pending = {
            let mut slot = self.inflight.lock();
            match slot.as_ref() {
                Some(pending) => {
                    debug!("joining in-flight session refresh");
                    pending.clone()
                }
                None => {
                    let pending = self.start_refresh();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    pub fn is_refreshing(&self) -> bool {
        self.inflight.lock().is_some()
    }

    fn start_refresh(&self) -> SharedRefresh {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let endpoint = Arc::clone(&self.endpoint);
        let credentials = self.credentials.clone();
        let slot = Arc::clone(&self.inflight);
        let timeout = self.timeout;

        async move {
            info!(ticket, "refreshing session credentials");
            let result = match tokio::time::timeout(timeout, endpoint.refresh(credentials.get()))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(RefreshError::Timeout),
            };
            let refreshed = match result {
                Ok(next) => {
                    credentials.install(next);
                    info!(ticket, "session refreshed");
                    true
                }
                Err(err) => {
                    warn!(ticket, "session refresh failed: {err}");
                    false
                }
            };
            slot.lock().take();
            RefreshOutcome { ticket, refreshed }
        }
        .boxed()
        .shared()
    }
}

impl fmt::Debug for TokenRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRefresher")
            .field("timeout", &self.timeout)
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    RefreshFailed,
    CredentialsRejected,
}

/// Navigation side effect fired on unrecoverable auth failure.
pub trait SignOutHandler: Send + Sync {
    fn sign_out(&self, reason: SignOutReason);
}

/// Default sign-out: logs the redirect target. Hosts with a navigation layer
/// supply their own handler.
#[derive(Debug, Clone)]
pub struct RedirectSignOut {
    sign_in_url: String,
}

impl RedirectSignOut {
    pub fn new(sign_in_url: impl Into<String>) -> Self {
        Self {
            sign_in_url: sign_in_url.into(),
        }
    }

    pub fn sign_in_url(&self) -> &str {
        &self.sign_in_url
    }
}

impl SignOutHandler for RedirectSignOut {
    fn sign_out(&self, reason: SignOutReason) {
        warn!(?reason, url = %self.sign_in_url, "session ended; redirecting to sign-in");
    }
}
