//! Scripted collaborators for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::auth::Credentials;
use crate::auth::RefreshEndpoint;
use crate::auth::RefreshError;
use crate::auth::SignOutHandler;
use crate::auth::SignOutReason;
use crate::operation::Operation;
use crate::transport::GraphQlResponse;
use crate::transport::Transport;
use crate::transport::TransportError;

type Scripted = Result<GraphQlResponse, TransportError>;

enum Script {
    Sequence(Mutex<VecDeque<Scripted>>),
    Always(Scripted),
    /// 401 unless the request carries this access token.
    RequireToken { token: String, data: Value },
}

pub(crate) struct ScriptedTransport {
    script: Script,
    delay: Duration,
    /// Per-call delays, consumed in call order before `delay` applies.
    delays: Mutex<VecDeque<Duration>>,
    calls: AtomicUsize,
    operations: Mutex<Vec<Operation>>,
    tokens: Mutex<Vec<Option<String>>>,
}

impl ScriptedTransport {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            delay: Duration::ZERO,
            delays: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            operations: Mutex::new(Vec::new()),
            tokens: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn sequence(responses: Vec<Scripted>) -> Self {
        Self::with_script(Script::Sequence(Mutex::new(responses.into())))
    }

    pub(crate) fn always(response: Scripted) -> Self {
        Self::with_script(Script::Always(response))
    }

    pub(crate) fn require_token(token: &str, data: Value) -> Self {
        Self::with_script(Script::RequireToken {
            token: token.to_string(),
            data,
        })
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn with_delays(self, delays: Vec<Duration>) -> Self {
        *self.delays.lock() = delays.into();
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn operations(&self) -> Vec<Operation> {
        self.operations.lock().clone()
    }

    pub(crate) fn tokens(&self) -> Vec<Option<String>> {
        self.tokens.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(
        &self,
        operation: &Operation,
        credentials: Option<&Credentials>,
    ) -> Result<GraphQlResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.operations.lock().push(operation.clone());
        let token = credentials.map(|c| c.access_token.clone());
        self.tokens.lock().push(token.clone());
        let delay = self.delays.lock().pop_front().unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match &self.script {
            Script::Sequence(queue) => queue
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Network("script exhausted".into()))),
            Script::Always(response) => response.clone(),
            Script::RequireToken { token: required, data } => {
                if token.as_deref() == Some(required.as_str()) {
                    Ok(GraphQlResponse::from_data(data.clone()))
                } else {
                    Err(TransportError::HttpStatus {
                        status: 401,
                        body: "unauthorized".into(),
                    })
                }
            }
        }
    }
}

pub(crate) struct ScriptedRefresh {
    result: Result<Credentials, RefreshError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedRefresh {
    const DEFAULT_DELAY: Duration = Duration::from_millis(50);

    pub(crate) fn succeeding(token: &str) -> Self {
        Self {
            result: Ok(Credentials::new(token)),
            delay: Self::DEFAULT_DELAY,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            result: Err(RefreshError::Rejected),
            delay: Self::DEFAULT_DELAY,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RefreshEndpoint for ScriptedRefresh {
    async fn refresh(&self, _current: Option<Credentials>) -> Result<Credentials, RefreshError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.result.clone()
    }
}

#[derive(Default)]
pub(crate) struct RecordingSignOut {
    reasons: Mutex<Vec<SignOutReason>>,
}

impl RecordingSignOut {
    pub(crate) fn reasons(&self) -> Vec<SignOutReason> {
        self.reasons.lock().clone()
    }
}

impl SignOutHandler for RecordingSignOut {
    fn sign_out(&self, reason: SignOutReason) {
        self.reasons.lock().push(reason);
    }
}
