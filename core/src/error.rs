use std::time::Duration;
use thiserror::Error;

use crate::transport::GraphQlError;
use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, QueryError>;

/// Terminal outcome of an operation that did not produce data. `Clone` so a
/// single failure can be handed to every waiter of a deduplicated load.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    #[error("backend temporarily unavailable; retry in {}s", retry_after.as_secs())]
    CircuitOpen { retry_after: Duration },

    #[error("network unavailable")]
    Offline,

    #[error("session expired; sign in again")]
    SessionExpired,

    #[error("network error after {attempts} attempt(s): {source}")]
    TransientNetwork {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("request rejected with HTTP {status}")]
    Client { status: u16, body: String },

    #[error("{}", summarize(errors))]
    ServerData { errors: Vec<GraphQlError> },

    #[error("malformed response: {0}")]
    Protocol(String),
}

impl QueryError {
    /// Errors that leave the UI in a blocked state until something external
    /// changes: connectivity, the breaker window, or the session.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            QueryError::CircuitOpen { .. } | QueryError::Offline | QueryError::SessionExpired
        )
    }
}

fn summarize(errors: &[GraphQlError]) -> String {
    match errors {
        [] => "server returned errors".to_string(),
        [only] => format!("server error: {}", only.message),
        [first, rest @ ..] => format!("server error: {} (+{} more)", first.message, rest.len()),
    }
}
