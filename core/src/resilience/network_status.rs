use chrono::DateTime;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::Weak;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::NetworkConfig;

/// Point-in-time view of the request gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NetworkStatus {
    pub is_online: bool,
    pub is_backend_available: bool,
    pub error_count: u32,
    pub last_error_at: Option<DateTime<Utc>>,
    pub is_in_error_state: bool,
    pub can_make_request: bool,
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self {
            is_online: true,
            is_backend_available: true,
            error_count: 0,
            last_error_at: None,
            is_in_error_state: false,
            can_make_request: true,
        }
    }
}

type RecoveryCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug)]
struct MonitorState {
    is_online: bool,
    is_backend_available: bool,
    error_count: u32,
    last_error_at: Option<Instant>,
    last_error_wall: Option<DateTime<Utc>>,
    /// Gate value last published; recovery fires on its false -> true edge.
    permitted: bool,
    cooldown_task: Option<AbortHandle>,
}

impl MonitorState {
    fn in_error_state(&self, config: &NetworkConfig) -> bool {
        self.error_count >= config.max_error_count
            && self
                .last_error_at
                .is_some_and(|at| at.elapsed() < config.cooldown())
    }

    fn snapshot(&self, config: &NetworkConfig) -> NetworkStatus {
        let is_in_error_state = self.in_error_state(config);
        NetworkStatus {
            is_online: self.is_online,
            is_backend_available: self.is_backend_available,
            error_count: self.error_count,
            last_error_at: self.last_error_wall,
            is_in_error_state,
            can_make_request: self.is_online && self.is_backend_available && !is_in_error_state,
        }
    }

    fn cancel_cooldown_task(&mut self) {
        if let Some(task) = self.cooldown_task.take() {
            task.abort();
        }
    }
}

impl Drop for MonitorState {
    fn drop(&mut self) {
        self.cancel_cooldown_task();
    }
}

struct Shared {
    config: NetworkConfig,
    state: Mutex<MonitorState>,
    status_tx: watch::Sender<NetworkStatus>,
    online: Notify,
    recovery: Mutex<Vec<RecoveryCallback>>,
}

impl Shared {
    /// Re-evaluates the gate, publishes it and fires recovery callbacks on
    /// the blocked -> permitted edge. Callbacks run with no lock held.
    fn publish(&self) -> NetworkStatus {
        let (status, recovered) = {
            let mut state = self.state.lock();
            let status = state.snapshot(&self.config);
            let recovered = status.can_make_request && !state.permitted;
            state.permitted = status.can_make_request;
            (status, recovered)
        };

        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });

        if recovered {
            info!("network gate reopened; notifying recovery listeners");
            let callbacks = self.recovery.lock().clone();
            for callback in callbacks {
                callback();
            }
        }
        status
    }
}

/// Tracks connectivity and a rolling transport error count. Cheap to clone;
/// clones share state.
#[derive(Clone)]
pub struct NetworkStatusMonitor {
    shared: Arc<Shared>,
}

impl Default for NetworkStatusMonitor {
    fn default() -> Self {
        Self::new(NetworkConfig::default())
    }
}

impl NetworkStatusMonitor {
    pub fn new(config: NetworkConfig) -> Self {
        let (status_tx, _) = watch::channel(NetworkStatus::default());
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(MonitorState {
                    is_online: true,
                    is_backend_available: true,
                    error_count: 0,
                    last_error_at: None,
                    last_error_wall: None,
                    permitted: true,
                    cooldown_task: None,
                }),
                status_tx,
                online: Notify::new(),
                recovery: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.shared.config
    }

    /// Current status. Also publishes it, so a cooldown that expired since
    /// the last mutation is observed here.
    pub fn status(&self) -> NetworkStatus {
        self.shared.publish()
    }

    pub fn can_make_request(&self) -> bool {
        self.status().can_make_request
    }

    pub fn is_in_error_state(&self) -> bool {
        self.status().is_in_error_state
    }

    /// Records a transient transport failure. Errors arriving in a burst
    /// count in full; isolated errors never push the count to the blocking
    /// threshold on their own.
    pub fn track_error(&self) {
        let config = &self.shared.config;
        {
            let mut state = self.shared.state.lock();
            let now = Instant::now();
            if state
                .last_error_at
                .is_some_and(|at| now.duration_since(at) >= config.cooldown())
            {
                state.error_count = 0;
            }

            let in_burst = state
                .last_error_at
                .is_some_and(|at| now.duration_since(at) < config.burst_window());
            let next = state.error_count.saturating_add(1);
            state.error_count = if in_burst {
                next
            } else {
                next.min(config.max_error_count.saturating_sub(1))
                    .max(state.error_count)
            };
            state.last_error_at = Some(now);
            state.last_error_wall = Some(Utc::now());

            if state.in_error_state(config) {
                warn!(
                    error_count = state.error_count,
                    cooldown_ms = config.cooldown_ms,
                    "network monitor entered error state"
                );
                state.cancel_cooldown_task();
                state.cooldown_task = self.schedule_cooldown_check(now);
            } else {
                debug!(error_count = state.error_count, in_burst, "transport error tracked");
            }
        }
        self.shared.publish();
    }

    pub fn reset_errors(&self) {
        {
            let mut state = self.shared.state.lock();
            state.error_count = 0;
            state.last_error_at = None;
            state.last_error_wall = None;
            state.cancel_cooldown_task();
        }
        self.shared.publish();
    }

    /// Clears errors and assumes both the network and the backend are back.
    pub fn force_reset(&self) {
        {
            let mut state = self.shared.state.lock();
            state.is_online = true;
            state.is_backend_available = true;
            state.error_count = 0;
            state.last_error_at = None;
            state.last_error_wall = None;
            state.cancel_cooldown_task();
        }
        info!("network monitor force reset");
        self.shared.publish();
    }

    pub fn set_online(&self, online: bool) {
        self.shared.state.lock().is_online = online;
        debug!(online, "connectivity changed");
        self.shared.publish();
        if online {
            self.shared.online.notify_one();
        }
    }

    pub fn set_backend_available(&self, available: bool) {
        self.shared.state.lock().is_backend_available = available;
        self.shared.publish();
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Registers a callback fired once per blocked -> permitted transition.
    pub fn on_recovery<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.recovery.lock().push(Arc::new(callback));
    }

    /// Resolves on the next `set_online(true)`.
    pub(crate) async fn online_event(&self) {
        self.shared.online.notified().await;
    }

    fn schedule_cooldown_check(&self, last_error_at: Instant) -> Option<AbortHandle> {
        let handle = Handle::try_current().ok()?;
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let deadline = last_error_at + self.shared.config.cooldown();
        let task = handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(shared) = weak.upgrade() {
                shared.publish();
            }
        });
        Some(task.abort_handle())
    }
}

impl std::fmt::Debug for NetworkStatusMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkStatusMonitor")
            .field("status", &*self.shared.status_tx.borrow())
            .finish()
    }
}
