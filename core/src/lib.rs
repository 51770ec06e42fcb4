//! Resilient data access for the Signal GraphQL backend.
//!
//! [`SignalClient`] bundles the request gates (circuit breaker and network
//! monitor), single-flight credential refresh, the retrying request pipeline
//! and the merged page cache. Lists are paged through an
//! [`InfiniteScrollController`] obtained from the client.

mod auth;
pub mod cache;
mod client;
pub mod config;
mod error;
pub mod operation;
pub mod pipeline;
pub mod resilience;
pub mod scroll;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport;
mod util;

pub use auth::CredentialStore;
pub use auth::Credentials;
pub use auth::HttpRefreshEndpoint;
pub use auth::NoRefresh;
pub use auth::RedirectSignOut;
pub use auth::RefreshEndpoint;
pub use auth::RefreshError;
pub use auth::RefreshOutcome;
pub use auth::SESSION_COOKIE;
pub use auth::SignOutHandler;
pub use auth::SignOutReason;
pub use auth::TokenRefresher;
pub use cache::QueryCache;
pub use client::ClientStatus;
pub use client::ListQuery;
pub use client::SignalClient;
pub use config::ClientConfig;
pub use config::ConfigError;
pub use config::FieldPolicy;
pub use config::PaginationStyle;
pub use config::find_signal_home;
pub use error::QueryError;
pub use error::Result;
pub use operation::Operation;
pub use operation::PageTarget;
pub use operation::QueryKey;
pub use resilience::CircuitBreaker;
pub use resilience::CircuitState;
pub use resilience::HealthProbeHandle;
pub use resilience::NetworkStatus;
pub use resilience::NetworkStatusMonitor;
pub use scroll::InfiniteScrollController;
pub use scroll::LoadOutcome;
pub use scroll::ScrollSnapshot;
pub use transport::GraphQlError;
pub use transport::GraphQlResponse;
pub use transport::HttpTransport;
pub use transport::Transport;
pub use transport::TransportError;
