use std::time::Duration;

/// Default number of automatic reconnection attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Default delay before the first reconnection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1_000);
/// Upper bound applied to every computed reconnection delay.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_millis(10_000);

/// Exponential reconnection policy owned by the session client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Whether organic stream termination triggers a reconnect at all.
    pub auto_reconnect: bool,
    /// Automatic attempts allowed since the last successful open.
    pub max_attempts: u32,
    /// Delay before the first attempt; doubled for each following one.
    pub base_delay: Duration,
    /// Ceiling for the computed delay.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_delay: DEFAULT_RECONNECT_DELAY,
            max_delay: MAX_RECONNECT_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never reconnects automatically.
    pub fn disabled() -> Self {
        Self {
            auto_reconnect: false,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Returns whether another automatic attempt is allowed after
    /// `attempts_done` attempts.
    pub fn can_retry(&self, attempts_done: u32) -> bool {
        self.auto_reconnect && attempts_done < self.max_attempts
    }

    /// Delay before the given 1-based attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.base_delay, self.max_delay)
    }
}

/// Computes `base * 2^(attempt - 1)` clamped to `ceiling`.
///
/// `attempt` is 1-based; `0` is treated as the first attempt.
pub fn backoff_delay(attempt: u32, base: Duration, ceiling: Duration) -> Duration {
    let mut delay = base;
    for _ in 1..attempt.max(1) {
        if delay >= ceiling || delay.is_zero() {
            break;
        }
        delay = delay.saturating_mul(2);
    }
    delay.min(ceiling)
}
