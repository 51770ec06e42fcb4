use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

const BACKOFF_FACTOR: f64 = 2.0;

/// Delay before retry number `attempt` (1-based): exponential growth from
/// the initial delay, capped at the configured maximum, with jitter applied
/// after the cap.
pub(crate) fn backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let exp = BACKOFF_FACTOR.powi(attempt.saturating_sub(1) as i32);
    let base = (config.initial_delay_ms as f64 * exp).min(config.max_delay_ms as f64);
    let jitter = config.jitter.clamp(0.0, 1.0);
    let factor = if jitter > 0.0 {
        rand::rng().random_range((1.0 - jitter)..(1.0 + jitter))
    } else {
        1.0
    };
    Duration::from_millis((base * factor) as u64)
}
