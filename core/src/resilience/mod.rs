pub mod circuit_breaker;
pub mod health;
pub mod network_status;

pub use circuit_breaker::CircuitBreaker;
pub use circuit_breaker::CircuitState;
pub use health::HealthProbeHandle;
pub use health::probe_backend;
pub use health::spawn_health_probe;
pub use network_status::NetworkStatus;
pub use network_status::NetworkStatusMonitor;

use std::fmt;

use crate::config::ClientConfig;

/// The two request gates shared by everything issuing operations on behalf
/// of one client. Clones share state.
#[derive(Clone, Default)]
pub struct ResilienceServices {
    pub breaker: CircuitBreaker,
    pub network: NetworkStatusMonitor,
}

impl ResilienceServices {
    pub fn new(breaker: CircuitBreaker, network: NetworkStatusMonitor) -> Self {
        Self { breaker, network }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            CircuitBreaker::from_config(&config.breaker),
            NetworkStatusMonitor::new(config.network.clone()),
        )
    }

    /// Clears both gates: breaker closed, errors forgotten, connectivity
    /// assumed.
    pub fn force_reset(&self) {
        self.breaker.reset();
        self.network.force_reset();
    }
}

impl fmt::Debug for ResilienceServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilienceServices")
            .field("breaker", &self.breaker.state())
            .field("failures", &self.breaker.failure_count())
            .field("network", &self.network.status())
            .finish()
    }
}
