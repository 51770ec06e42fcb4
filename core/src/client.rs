use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::auth::CredentialStore;
use crate::auth::Credentials;
use crate::auth::HttpRefreshEndpoint;
use crate::auth::NoRefresh;
use crate::auth::RedirectSignOut;
use crate::auth::RefreshEndpoint;
use crate::auth::SignOutHandler;
use crate::cache::PageSummary;
use crate::cache::QueryCache;
use crate::config::ClientConfig;
use crate::error::QueryError;
use crate::operation::Operation;
use crate::operation::PageTarget;
use crate::operation::QueryKey;
use crate::pipeline::RequestPipeline;
use crate::resilience::CircuitState;
use crate::resilience::HealthProbeHandle;
use crate::resilience::NetworkStatus;
use crate::resilience::ResilienceServices;
use crate::resilience::probe_backend;
use crate::resilience::spawn_health_probe;
use crate::scroll::InfiniteScrollController;
use crate::scroll::PageLoader;
use crate::transport::HttpTransport;
use crate::transport::Transport;
use crate::transport::TransportError;

/// Everything one application session needs to talk to the backend: request
/// gates, credentials, the pipeline and the merged-result cache. Construct
/// one per session and share it behind an `Arc`.
pub struct SignalClient {
    config: ClientConfig,
    pipeline: RequestPipeline,
    cache: QueryCache,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientStatus {
    pub endpoint: String,
    pub network: NetworkStatus,
    pub breaker: CircuitState,
    pub breaker_failures: u32,
    pub signed_in: bool,
    pub cached_entries: usize,
}

impl SignalClient {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        refresh: Arc<dyn RefreshEndpoint>,
        sign_out: Arc<dyn SignOutHandler>,
    ) -> Self {
        let services = ResilienceServices::from_config(&config);
        let credentials = CredentialStore::new(config.auth.access_token.clone().map(|token| {
            Credentials {
                access_token: token,
                refresh_token: config.auth.refresh_token.clone(),
            }
        }));
        let pipeline =
            RequestPipeline::new(&config, transport, services, credentials, refresh, sign_out);
        let cache = QueryCache::new(config.cache.fields.clone());
        Self {
            config,
            pipeline,
            cache,
        }
    }

    /// Client over HTTP for `config.endpoint`, refreshing through
    /// `auth.refresh_url` when one is configured.
    pub fn from_config(config: ClientConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(config.endpoint.clone(), config.request_timeout())?;
        let refresh: Arc<dyn RefreshEndpoint> = match &config.auth.refresh_url {
            Some(url) => Arc::new(HttpRefreshEndpoint::new(url.clone(), transport.client().clone())),
            None => Arc::new(NoRefresh),
        };
        let sign_out = Arc::new(RedirectSignOut::new(config.auth.sign_in_url.clone()));
        Ok(Self::new(config, Arc::new(transport), refresh, sign_out))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Executes `operation` and folds the result into the cache. Paginated
    /// fields in the returned data hold every page merged so far.
    pub async fn query(&self, operation: &Operation) -> Result<Value, QueryError> {
        let data = self.pipeline.execute(operation).await?;
        self.cache
            .write(operation, data)
            .map_err(|err| QueryError::Protocol(err.to_string()))
    }

    /// Cached data for `operation` without touching the network.
    pub fn read(&self, operation: &Operation) -> Option<Value> {
        self.cache.read(operation)
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn invalidate(&self, key: &QueryKey) -> bool {
        self.cache.invalidate(key)
    }

    pub fn invalidate_field(&self, field: &str) -> usize {
        let removed = self.cache.invalidate_field(field);
        info!(field, removed, "invalidated cached field");
        removed
    }

    pub fn credentials(&self) -> &CredentialStore {
        self.pipeline.credentials()
    }

    pub fn sign_in(&self, credentials: Credentials) {
        self.pipeline.credentials().install(credentials);
    }

    pub fn network_status(&self) -> NetworkStatus {
        self.pipeline.services().network.status()
    }

    pub fn subscribe_network(&self) -> watch::Receiver<NetworkStatus> {
        self.pipeline.services().network.subscribe()
    }

    pub fn on_recovery<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.pipeline.services().network.on_recovery(callback);
    }

    /// Connectivity change reported by the host platform.
    pub fn set_online(&self, online: bool) {
        self.pipeline.services().network.set_online(online);
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.pipeline.services().breaker.state()
    }

    pub fn force_reset(&self) {
        info!("resetting request gates");
        self.pipeline.services().force_reset();
    }

    pub fn status(&self) -> ClientStatus {
        let services = self.pipeline.services();
        ClientStatus {
            endpoint: self.config.endpoint.clone(),
            network: services.network.status(),
            breaker: services.breaker.state(),
            breaker_failures: services.breaker.failure_count(),
            signed_in: self.credentials().get().is_some(),
            cached_entries: self.cache.len(),
        }
    }

    /// Sends the health probe once, regardless of the gate state.
    pub async fn probe(&self) -> bool {
        let transport = self.pipeline.transport();
        probe_backend(
            &self.pipeline.services().network,
            transport.as_ref(),
            self.pipeline.credentials(),
        )
        .await
    }

    pub fn spawn_health_probe(&self) -> HealthProbeHandle {
        spawn_health_probe(
            self.pipeline.services().network.clone(),
            self.pipeline.transport(),
            self.pipeline.credentials().clone(),
        )
    }

    pub fn scroll_controller(self: &Arc<Self>, list: ListQuery) -> InfiniteScrollController {
        InfiniteScrollController::new(Arc::new(ClientPageLoader {
            client: Arc::clone(self),
            list,
        }))
    }
}

impl std::fmt::Debug for SignalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalClient")
            .field("endpoint", &self.config.endpoint)
            .field("pipeline", &self.pipeline)
            .field("cached_entries", &self.cache.len())
            .finish()
    }
}

/// A paginated list: the operation for its first page and the root field
/// holding the list. The field needs a cache policy for pages to merge.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub operation: Operation,
    pub field: String,
}

impl ListQuery {
    pub fn new(operation: Operation, field: impl Into<String>) -> Self {
        Self {
            operation: operation.first_page(),
            field: field.into(),
        }
    }
}

struct ClientPageLoader {
    client: Arc<SignalClient>,
    list: ListQuery,
}

#[async_trait]
impl PageLoader for ClientPageLoader {
    fn key(&self) -> QueryKey {
        self.client
            .cache
            .list_key(&self.list.field, self.list.operation.variables())
    }

    fn summary(&self) -> Option<PageSummary> {
        self.client
            .cache
            .summary(&self.list.field, self.list.operation.variables())
    }

    fn can_request(&self) -> bool {
        let services = self.client.pipeline.services();
        services.network.can_make_request() && services.breaker.can_execute()
    }

    async fn load_page(&self, target: PageTarget) -> Result<PageSummary, QueryError> {
        let operation = target.apply(&self.list.operation);
        self.client.query(&operation).await?;
        Ok(self.summary().unwrap_or_default())
    }
}
