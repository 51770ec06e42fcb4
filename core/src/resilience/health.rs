use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::auth::CredentialStore;
use crate::operation::Operation;
use crate::resilience::NetworkStatusMonitor;
use crate::transport::Transport;
use crate::transport::TransportError;

/// Background reachability probe. Aborts its task when dropped.
#[derive(Debug)]
pub struct HealthProbeHandle {
    task: JoinHandle<()>,
}

impl HealthProbeHandle {
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for HealthProbeHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Starts the probe loop. While the monitor blocks requests, the probe
/// operation is sent every `probe_interval`, or immediately when
/// connectivity comes back.
pub fn spawn_health_probe(
    monitor: NetworkStatusMonitor,
    transport: Arc<dyn Transport>,
    credentials: CredentialStore,
) -> HealthProbeHandle {
    let period = monitor.config().probe_interval();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = monitor.online_event() => {
                    debug!("connectivity restored; probing immediately");
                }
            }

            let status = monitor.status();
            if status.can_make_request {
                continue;
            }
            if !status.is_online {
                debug!("offline; skipping health probe");
                continue;
            }
            probe_backend(&monitor, transport.as_ref(), &credentials).await;
        }
    });
    HealthProbeHandle { task }
}

/// Sends the probe operation once and records the result on the monitor.
/// Returns whether the backend answered.
pub async fn probe_backend(
    monitor: &NetworkStatusMonitor,
    transport: &dyn Transport,
    credentials: &CredentialStore,
) -> bool {
    let config = monitor.config();
    let operation = Operation::new(config.probe_document.clone());
    let current = credentials.get();
    let result =
        tokio::time::timeout(config.probe_timeout(), transport.execute(&operation, current.as_ref()))
            .await;

    let reachable = match result {
        Ok(Ok(_)) => true,
        // Any non-5xx answer proves the backend is up.
        Ok(Err(TransportError::HttpStatus { status, .. })) => status < 500,
        Ok(Err(err)) => {
            debug!("health probe failed: {err}");
            false
        }
        Err(_) => {
            debug!("health probe timed out");
            false
        }
    };

    if reachable {
        info!("health probe succeeded");
        monitor.set_backend_available(true);
        monitor.reset_errors();
    } else {
        warn!("health probe failed; backend marked unavailable");
        monitor.set_backend_available(false);
    }
    reachable
}
