use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Exponential backoff shared by every retry loop in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    /// Delay before the first retry, in milliseconds
    pub base_ms: u64,
    /// Multiplier applied per further retry
    pub factor: u32,
    /// Upper bound on a single delay, in milliseconds
    pub max_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_ms: 200,
            factor: 2,
            max_ms: 5_000,
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let multiplier = (self.factor.max(1) as u64).saturating_pow(retry);
        let ms = self.base_ms.saturating_mul(multiplier).min(self.max_ms);
        Duration::from_millis(ms)
    }
}

/// Sleeps for `delay` unless `cancel` fires first. Returns false when cancelled.
pub async fn sleep_or_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
