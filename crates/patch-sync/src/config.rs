use std::env;
use std::time::Duration;

use crate::backoff::BackoffConfig;

const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Engine configuration shared by every subscription of a client.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub backoff: BackoffConfig,
    /// Window after the connection opens in which a snapshot (or `Ready`)
    /// must arrive. `None` waits forever.
    pub snapshot_timeout: Option<Duration>,
    pub connect_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            snapshot_timeout: Some(DEFAULT_SNAPSHOT_TIMEOUT),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl SyncConfig {
    /// Load configuration from `PATCH_SYNC_*` environment variables.
    /// Missing or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let millis = |name: &str| {
            lookup(name)
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };
        let float = |name: &str| {
            lookup(name)
                .and_then(|raw| raw.trim().parse::<f64>().ok())
                .filter(|value| value.is_finite())
        };

        let defaults = Self::default();
        let backoff = BackoffConfig {
            initial: millis("PATCH_SYNC_BACKOFF_INITIAL_MS").unwrap_or(defaults.backoff.initial),
            max: millis("PATCH_SYNC_BACKOFF_MAX_MS").unwrap_or(defaults.backoff.max),
            multiplier: float("PATCH_SYNC_BACKOFF_MULTIPLIER")
                .filter(|value| *value >= 1.0)
                .unwrap_or(defaults.backoff.multiplier),
            jitter: float("PATCH_SYNC_BACKOFF_JITTER")
                .filter(|value| (0.0..=1.0).contains(value))
                .unwrap_or(defaults.backoff.jitter),
            max_attempts: lookup("PATCH_SYNC_MAX_RECONNECT_ATTEMPTS")
                .and_then(|raw| raw.trim().parse::<u32>().ok())
                .or(defaults.backoff.max_attempts),
        };
        let snapshot_timeout = match millis("PATCH_SYNC_SNAPSHOT_TIMEOUT_MS") {
            Some(Duration::ZERO) => None,
            Some(timeout) => Some(timeout),
            None => defaults.snapshot_timeout,
        };
        let connect_timeout = millis("PATCH_SYNC_CONNECT_TIMEOUT_MS")
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or(defaults.connect_timeout);

        Self {
            backoff,
            snapshot_timeout,
            connect_timeout,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_snapshot_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.snapshot_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.backoff.max_attempts = max_attempts;
        self
    }
}
