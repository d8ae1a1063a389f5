//! Exponential backoff schedule shared by retries, reconnects, and restarts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff: `base * 2^attempt`, capped at `cap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    /// Delay before the first retry (doubles each attempt).
    pub base: Duration,
    /// Upper bound on the delay between attempts.
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(5),
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay to sleep before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Clamp the exponent so the multiplier cannot overflow u32.
        let factor = 2u32.saturating_pow(attempt.min(20));
        self.base.saturating_mul(factor).min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(60));

        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_respects_cap() {
        let backoff = Backoff::default();

        // Default cap is 5s; a large attempt number must not exceed it.
        assert_eq!(backoff.delay_for_attempt(30), Duration::from_secs(5));
        assert_eq!(backoff.delay_for_attempt(1000), Duration::from_secs(5));
    }
}
