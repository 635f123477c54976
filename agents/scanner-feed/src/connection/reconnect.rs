//! Reconnect Policy
//!
//! Delay before the next connection attempt. The baseline is a fixed
//! interval; capped exponential backoff with optional jitter is opt-in.

use rand::Rng;
use std::time::Duration;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Upper bound for the computed delay, before jitter
    pub max_delay: Duration,
    /// Growth factor per consecutive failed attempt
    pub multiplier: f64,
    /// Add up to 10% random extra delay
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    backoff: Option<Backoff>,
}

impl ReconnectPolicy {
    /// Reconnect after the same delay every time
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            backoff: None,
        }
    }

    /// Start at `base_delay` and grow by the backoff multiplier
    pub fn exponential(base_delay: Duration, backoff: Backoff) -> Self {
        Self {
            base_delay,
            backoff: Some(backoff),
        }
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn backoff(&self) -> Option<&Backoff> {
        self.backoff.as_ref()
    }

    /// Delay before reconnect number `attempt` (1-based, counted since the
    /// connection was last open)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let Some(backoff) = &self.backoff else {
            return self.base_delay;
        };

        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.base_delay.as_secs_f64() * backoff.multiplier.max(1.0).powi(exponent);
        let capped = scaled.min(backoff.max_delay.as_secs_f64());
        let mut delay = Duration::from_secs_f64(capped);

        if backoff.jitter {
            let extra_ms = delay.as_millis() as u64 / 10;
            if extra_ms > 0 {
                delay += Duration::from_millis(rand::rng().random_range(0..=extra_ms));
            }
        }

        delay
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(50), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_doubles_up_to_cap() {
        let policy = ReconnectPolicy::exponential(
            Duration::from_millis(500),
            Backoff {
                max_delay: Duration::from_secs(3),
                ..Backoff::default()
            },
        );

        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
        assert_eq!(policy.delay_for(1000), Duration::from_secs(3));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = ReconnectPolicy::exponential(
            Duration::from_secs(1),
            Backoff {
                jitter: true,
                ..Backoff::default()
            },
        );

        for _ in 0..100 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1100));
        }
    }
}
