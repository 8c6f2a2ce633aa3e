use std::time::Duration;

use rand::Rng;

const MIN_DELAY: Duration = Duration::from_millis(10);

/// Reconnect delay policy.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Fraction of each delay that is randomized, in `0.0..=1.0`.
    pub jitter: f64,
    /// `None` retries for as long as the subscription stays enabled.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.5,
            max_attempts: None,
        }
    }
}

impl BackoffConfig {
    /// Upper bound of the delay before reconnect attempt `attempt` (0-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let multiplier = self.multiplier.max(1.0);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial.as_secs_f64() * multiplier.powi(exponent);
        let capped = scaled.min(self.max.as_secs_f64());
        if capped.is_finite() {
            Duration::from_secs_f64(capped).max(MIN_DELAY)
        } else {
            self.max.max(MIN_DELAY)
        }
    }
}

/// Attempt counter over a [`BackoffConfig`].
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next reconnect, or `None` once attempts are used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(limit) = self.config.max_attempts {
            if self.attempt >= limit {
                return None;
            }
        }
        let ceiling = self.config.ceiling(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        Some(self.jittered(ceiling))
    }

    /// Reconnects scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    fn jittered(&self, ceiling: Duration) -> Duration {
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return ceiling;
        }
        let floor = ceiling.as_secs_f64() * (1.0 - jitter);
        let picked = rand::thread_rng().gen_range(floor..=ceiling.as_secs_f64());
        Duration::from_secs_f64(picked).max(MIN_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(max_attempts: Option<u32>) -> BackoffConfig {
        BackoffConfig {
            jitter: 0.0,
            max_attempts,
            ..BackoffConfig::default()
        }
    }

    #[test]
    fn doubles_until_the_cap() {
        let mut backoff = Backoff::new(fixed(None));
        let delays: Vec<u64> = (0..8)
            .map(|_| backoff.next_delay().unwrap().as_secs())
            .collect();
        assert_eq!(delays, [1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn stops_after_max_attempts_and_restarts_on_reset() {
        let mut backoff = Backoff::new(fixed(Some(2)));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 2);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn jitter_stays_inside_the_window() {
        let mut backoff = Backoff::new(BackoffConfig::default());
        for attempt in 0..10 {
            let ceiling = BackoffConfig::default().ceiling(attempt);
            let delay = backoff.next_delay().unwrap();
            assert!(delay <= ceiling, "{delay:?} above {ceiling:?}");
            assert!(delay >= ceiling / 2, "{delay:?} below half of {ceiling:?}");
        }
    }

    #[test]
    fn never_returns_a_zero_delay() {
        let config = BackoffConfig {
            initial: Duration::ZERO,
            jitter: 1.0,
            ..BackoffConfig::default()
        };
        let mut backoff = Backoff::new(config);
        for _ in 0..5 {
            assert!(backoff.next_delay().unwrap() >= MIN_DELAY);
        }
    }

    #[test]
    fn huge_attempt_counts_saturate_at_max() {
        let config = fixed(None);
        assert_eq!(config.ceiling(10_000), Duration::from_secs(30));
    }
}
