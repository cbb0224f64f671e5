use std::time::Duration;

/// Backoff settings for re-establishing realtime channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first retry; doubles on each further attempt.
    pub base_delay: Duration,
    /// Retries before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
        }
    }
}

/// Bounded exponential backoff: `base * 2^(n-1)` for attempts `1..=max`.
///
/// Exhaustion is not an error. `next_delay` just stops yielding delays until
/// `reset` is called.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Delay for the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.config.base_delay.saturating_mul(factor)
    }

    /// Count one more attempt and return how long to wait before it,
    /// or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(self.delay_for(self.attempts))
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.config.max_attempts
    }

    pub fn config(&self) -> ReconnectConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_and_stop_after_five() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            base_delay: Duration::from_millis(100),
            max_attempts: 5,
        });

        let delays: Vec<u128> = std::iter::from_fn(|| policy.next_delay())
            .map(|d| d.as_millis())
            .collect();

        assert_eq!(delays, vec![100, 200, 400, 800, 1600]);
        assert!(policy.is_exhausted());
        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.attempts(), 5);
    }

    #[test]
    fn reset_restarts_from_base_delay() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        policy.next_delay();
        policy.next_delay();
        policy.reset();

        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let policy = ReconnectPolicy::new(ReconnectConfig::default());
        assert_eq!(policy.delay_for(64), Duration::from_millis(1000).saturating_mul(u32::MAX));
    }
}
