//! Reconnect delay policies
//!
//! The channel takes the policy as an injectable strategy so the
//! observed constant-delay behavior can be swapped for a stepped ladder
//! without touching the channel's contract.

use std::time::Duration;

/// Decides how long to wait before reconnect attempt `attempt` (1-based)
pub trait ReconnectPolicy: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

/// Fixed delay between attempts
#[derive(Debug, Clone)]
pub struct ConstantBackoff {
    delay: Duration,
}

impl ConstantBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for ConstantBackoff {
    /// The delay the client has always used between retries
    fn default() -> Self {
        Self::new(Duration::from_secs(4))
    }
}

impl ReconnectPolicy for ConstantBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Increasing ladder of delays, capped at the last step
#[derive(Debug, Clone)]
pub struct SteppedBackoff {
    steps: Vec<Duration>,
}

impl SteppedBackoff {
    pub fn new(steps: Vec<Duration>) -> Self {
        debug_assert!(!steps.is_empty(), "backoff ladder must have at least one step");
        Self { steps }
    }
}

impl Default for SteppedBackoff {
    fn default() -> Self {
        Self::new(
            [1, 2, 5, 10, 30]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
        )
    }
}

impl ReconnectPolicy for SteppedBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let idx = (attempt.saturating_sub(1) as usize).min(self.steps.len() - 1);
        self.steps[idx]
    }
}
