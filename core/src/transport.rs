use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::COOKIE;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::auth::Credentials;
use crate::operation::Operation;

const UNAUTHENTICATED_CODE: &str = "UNAUTHENTICATED";

/// Failure produced by the transport itself. Classification in the request
/// pipeline matches on these variants, never on error messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("network failure: {0}")]
    Network(String),
    #[error("unexpected HTTP status {status}")]
    HttpStatus { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Timeouts, connection failures and 5xx responses are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout
            | TransportError::ConnectionRefused(_)
            | TransportError::Network(_) => true,
            TransportError::HttpStatus { status, .. } => *status >= 500,
            TransportError::Decode(_) => false,
        }
    }

    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, TransportError::HttpStatus { status: 401, .. })
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::ConnectionRefused(err.to_string())
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.extensions = Some(serde_json::json!({ "code": code }));
        self
    }

    pub fn code(&self) -> Option<&str> {
        self.extensions.as_ref()?.get("code")?.as_str()
    }

    pub fn is_unauthenticated(&self) -> bool {
        self.code()
            .is_some_and(|code| code.eq_ignore_ascii_case(UNAUTHENTICATED_CODE))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<GraphQlError>>,
}

impl GraphQlResponse {
    pub fn from_data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: None,
        }
    }

    pub fn from_errors(errors: Vec<GraphQlError>) -> Self {
        Self {
            data: None,
            errors: Some(errors),
        }
    }

    pub fn errors(&self) -> &[GraphQlError] {
        self.errors.as_deref().unwrap_or_default()
    }
}

/// Executes one operation against the backend. Implementations perform a
/// single attempt; retries and credential refresh belong to the pipeline.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        operation: &Operation,
        credentials: Option<&Credentials>,
    ) -> Result<GraphQlResponse, TransportError>;
}

/// GraphQL-over-HTTP transport: POSTs the operation as JSON and forwards the
/// session both as a bearer token and as the session cookie.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::from_reqwest)?;
        Ok(Self::with_client(endpoint, client))
    }

    pub fn with_client(endpoint: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        operation: &Operation,
        credentials: Option<&Credentials>,
    ) -> Result<GraphQlResponse, TransportError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .json(&operation.request_body());
        if let Some(credentials) = credentials {
            request = request
                .bearer_auth(&credentials.access_token)
                .header(COOKIE, credentials.cookie_header());
        }

        debug!(operation = operation.identity(), "sending graphql operation");
        let response = request.send().await.map_err(TransportError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<GraphQlResponse>()
            .await
            .map_err(|err| TransportError::Decode(err.to_string()))
    }
}
