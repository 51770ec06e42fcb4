use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        })
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<Instant>,
    half_open_task: Option<AbortHandle>,
}

impl BreakerInner {
    fn cancel_half_open_task(&mut self) {
        if let Some(task) = self.half_open_task.take() {
            task.abort();
        }
    }
}

impl Drop for BreakerInner {
    fn drop(&mut self) {
        self.cancel_half_open_task();
    }
}

/// Process-local guard against retry storms. Opens after `threshold`
/// consecutive failures and lets a single probe through once the open window
/// has elapsed.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<BreakerInner>>,
    threshold: u32,
    open_duration: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::from_config(&BreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32, open_duration: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                last_failure_at: None,
                half_open_task: None,
            })),
            threshold: threshold.max(1),
            open_duration,
        }
    }

    pub fn from_config(config: &BreakerConfig) -> Self {
        Self::new(config.failure_threshold, config.open_duration())
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.settle(&mut inner);
        inner.state
    }

    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failures
    }

    pub fn last_failure_at(&self) -> Option<Instant> {
        self.inner.lock().last_failure_at
    }

    /// Time left before an open breaker admits a probe. `None` unless open.
    pub fn remaining_open(&self) -> Option<Duration> {
        let mut inner = self.inner.lock();
        self.settle(&mut inner);
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                Some(self.open_duration.saturating_sub(opened_at.elapsed()))
            }
            _ => None,
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!(from = %inner.state, "circuit breaker closed");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.cancel_half_open_task();
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        self.settle(&mut inner);
        let now = Instant::now();
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure_at = Some(now);

        let should_open = match inner.state {
            CircuitState::Closed => inner.failures >= self.threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if should_open {
            warn!(
                failures = inner.failures,
                open_for_ms = self.open_duration.as_millis() as u64,
                "circuit breaker opened"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            inner.cancel_half_open_task();
            inner.half_open_task = self.schedule_half_open(now);
        } else {
            debug!(failures = inner.failures, state = %inner.state, "circuit breaker failure recorded");
        }
    }

    /// Back to CLOSED with no failures, cancelling any scheduled transition.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.last_failure_at = None;
        inner.cancel_half_open_task();
    }

    fn settle(&self, inner: &mut BreakerInner) {
        if let (CircuitState::Open, Some(opened_at)) = (inner.state, inner.opened_at)
            && opened_at.elapsed() >= self.open_duration
        {
            transition_to_half_open(inner);
        }
    }

    /// The transition also happens lazily in `settle`; the task only makes
    /// it visible to code that never queries the breaker.
    fn schedule_half_open(&self, opened_at: Instant) -> Option<AbortHandle> {
        let handle = Handle::try_current().ok()?;
        let weak: Weak<Mutex<BreakerInner>> = Arc::downgrade(&self.inner);
        let deadline = opened_at + self.open_duration;
        let task = handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut inner = inner.lock();
            if inner.state == CircuitState::Open && inner.opened_at == Some(opened_at) {
                inner.half_open_task = None;
                transition_to_half_open(&mut inner);
            }
        });
        Some(task.abort_handle())
    }
}

fn transition_to_half_open(inner: &mut BreakerInner) {
    inner.state = CircuitState::HalfOpen;
    info!("circuit breaker half-open; admitting probe request");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::time::advance;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(5, Duration::from_millis(30_000))
    }

    #[tokio::test(start_paused = true)]
    async fn opens_at_threshold_and_reopens_after_window() {
        let breaker = breaker();
        for _ in 0..4 {
            breaker.on_failure();
            assert!(breaker.can_execute());
        }
        breaker.on_failure();
        assert!(!breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::Open);

        advance(Duration::from_millis(29_999)).await;
        assert!(!breaker.can_execute());
        assert_eq!(breaker.remaining_open(), Some(Duration::from_millis(1)));

        advance(Duration::from_millis(2)).await;
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_task_moves_to_half_open() {
        let breaker = breaker();
        for _ in 0..5 {
            breaker.on_failure();
        }
        tokio::time::sleep(Duration::from_millis(30_001)).await;
        tokio::task::yield_now().await;
        assert_eq!(breaker.inner.lock().state, CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_success_closes_and_failure_reopens() {
        let breaker = breaker();
        for _ in 0..5 {
            breaker.on_failure();
        }
        advance(Duration::from_secs(31)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        advance(Duration::from_secs(31)).await;
        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_consecutive_count() {
        let breaker = breaker();
        for _ in 0..4 {
            breaker.on_failure();
        }
        breaker.on_success();
        for _ in 0..4 {
            breaker.on_failure();
        }
        assert!(breaker.can_execute());
    }

    #[test]
    fn works_without_a_runtime() {
        let breaker = CircuitBreaker::new(1, Duration::ZERO);
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.last_failure_at(), None);
    }
}
