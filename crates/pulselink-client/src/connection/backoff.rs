use std::time::Duration;

use crate::config::ReconnectSection;

/// Exponential reconnect schedule: `base * 2^attempt`, for
/// `attempt < max_attempts`. Past the ceiling there is no next delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self { base_delay, max_attempts }
    }

    /// Delay before retry number `attempt` (0-based), or `None` once the
    /// ceiling is reached.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor))
    }
}

impl From<&ReconnectSection> for ReconnectPolicy {
    fn from(s: &ReconnectSection) -> Self {
        Self::new(s.base_delay(), s.max_attempts)
    }
}
