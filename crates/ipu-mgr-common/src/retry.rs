//! Bounded retry policy for convergence loops.
//!
//! Loops that wait on external state (address activation, device
//! enumeration after a driver reload) must terminate deterministically.
//! A [`RetryPolicy`] fixes the attempt count and the pause between
//! attempts up front; tests inject a zero interval.

use std::time::Duration;

/// A fixed retry budget: `max_attempts` tries, `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of attempts before the loop gives up.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub interval: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the given bounds.
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Policy used for control-channel address activation.
    pub const fn address_activation() -> Self {
        Self::new(8, Duration::from_secs(10))
    }

    /// Sleeps for one interval.
    pub async fn pause(&self) {
        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::address_activation()
    }
}
