use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::auth::CredentialStore;
use crate::auth::RefreshEndpoint;
use crate::auth::SignOutHandler;
use crate::auth::SignOutReason;
use crate::auth::TokenRefresher;
use crate::config::ClientConfig;
use crate::config::RetryConfig;
use crate::error::QueryError;
use crate::operation::Operation;
use crate::resilience::ResilienceServices;
use crate::transport::GraphQlResponse;
use crate::transport::Transport;
use crate::transport::TransportError;
use crate::util::backoff;

/// What one transmission means for the rest of the request.
#[derive(Debug)]
enum Outcome {
    Data(Value),
    Unauthenticated,
    Retryable(TransportError),
    Failed(QueryError),
}

fn classify(result: Result<GraphQlResponse, TransportError>) -> Outcome {
    match result {
        Ok(response) => {
            if response.errors().iter().any(|err| err.is_unauthenticated()) {
                return Outcome::Unauthenticated;
            }
            match response {
                GraphQlResponse {
                    errors: Some(errors),
                    ..
                } if !errors.is_empty() => Outcome::Failed(QueryError::ServerData { errors }),
                GraphQlResponse {
                    data: Some(data), ..
                } => Outcome::Data(data),
                GraphQlResponse { data: None, .. } => Outcome::Failed(QueryError::Protocol(
                    "response carried neither data nor errors".to_string(),
                )),
            }
        }
        Err(TransportError::HttpStatus { status: 401, .. }) => Outcome::Unauthenticated,
        Err(err @ TransportError::HttpStatus { status: 500.., .. }) => Outcome::Retryable(err),
        Err(TransportError::HttpStatus { status, body }) => {
            Outcome::Failed(QueryError::Client { status, body })
        }
        Err(TransportError::Decode(message)) => Outcome::Failed(QueryError::Protocol(message)),
        Err(
            err @ (TransportError::Timeout
            | TransportError::ConnectionRefused(_)
            | TransportError::Network(_)),
        ) => Outcome::Retryable(err),
    }
}

/// Runs operations through the request gates, the transport and the
/// retry/refresh policy.
pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    services: ResilienceServices,
    credentials: CredentialStore,
    refresher: TokenRefresher,
    sign_out: Arc<dyn SignOutHandler>,
    retry: RetryConfig,
}

impl RequestPipeline {
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        services: ResilienceServices,
        credentials: CredentialStore,
        refresh: Arc<dyn RefreshEndpoint>,
        sign_out: Arc<dyn SignOutHandler>,
    ) -> Self {
        let refresher =
            TokenRefresher::new(refresh, credentials.clone(), config.auth.refresh_timeout());
        Self {
            transport,
            services,
            credentials,
            refresher,
            sign_out,
            retry: config.retry,
        }
    }

    pub fn services(&self) -> &ResilienceServices {
        &self.services
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    pub fn refresher(&self) -> &TokenRefresher {
        &self.refresher
    }

    /// Checks every gate without touching the network.
    pub fn admit(&self) -> Result<(), QueryError> {
        if self.credentials.is_revoked() {
            return Err(QueryError::SessionExpired);
        }
        if !self.services.network.can_make_request() {
            return Err(QueryError::Offline);
        }
        if !self.services.breaker.can_execute() {
            return Err(QueryError::CircuitOpen {
                retry_after: self.services.breaker.remaining_open().unwrap_or_default(),
            });
        }
        Ok(())
    }

    pub async fn execute(&self, operation: &Operation) -> Result<Value, QueryError> {
        self.admit()?;

        let name = operation.identity();
        let mut transmissions = 0u32;
        let mut transient_failures = 0u32;
        let mut retransmitted_for_auth = false;
        loop {
            transmissions += 1;
            let sent = self.credentials.get();
            debug!(operation = name, transmission = transmissions, "executing operation");
            let result = self.transport.execute(operation, sent.as_ref()).await;
            if result.is_ok() {
                self.services.breaker.on_success();
                self.services.network.reset_errors();
            }

            match classify(result) {
                Outcome::Data(data) => return Ok(data),
                Outcome::Failed(err) => {
                    debug!(operation = name, "operation failed: {err}");
                    return Err(err);
                }
                Outcome::Unauthenticated => {
                    if self.credentials.is_revoked() {
                        debug!(operation = name, "session already ended");
                        return Err(QueryError::SessionExpired);
                    }
                    if retransmitted_for_auth {
                        warn!(operation = name, "credentials rejected after refresh");
                        self.end_session(SignOutReason::CredentialsRejected);
                        return Err(QueryError::SessionExpired);
                    }
                    retransmitted_for_auth = true;
                    // Rejected credentials were already replaced while this
                    // request was in flight.
                    if self.credentials.get() != sent {
                        debug!(operation = name, "credentials changed in flight; retransmitting");
                        continue;
                    }
                    let outcome = self.refresher.refresh().await;
                    if !outcome.refreshed {
                        self.end_session(SignOutReason::RefreshFailed);
                        return Err(QueryError::SessionExpired);
                    }
                    debug!(operation = name, ticket = outcome.ticket, "retransmitting after refresh");
                }
                Outcome::Retryable(err) => {
                    transient_failures += 1;
                    self.services.network.track_error();
                    if transient_failures >= self.retry.max_attempts {
                        self.services.breaker.on_failure();
                        warn!(
                            operation = name,
                            attempts = transient_failures,
                            "giving up after transient error: {err}"
                        );
                        return Err(QueryError::TransientNetwork {
                            attempts: transient_failures,
                            source: err,
                        });
                    }
                    let delay = backoff(transient_failures, &self.retry);
                    info!(
                        operation = name,
                        attempt = transient_failures,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after transient error: {err}"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Revokes the session and signs out. Only the caller that actually
    /// ends the session signs out.
    fn end_session(&self, reason: SignOutReason) {
        if !self.credentials.revoke() {
            return;
        }
        warn!(?reason, "ending session");
        self.sign_out.sign_out(reason);
    }
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("services", &self.services)
            .field("retry", &self.retry)
            .finish()
    }
}
