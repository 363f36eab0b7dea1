//! Configuration for the sync engine.

use cmsync_codec::CURRENT_FORMAT_VERSION;
use cmsync_persist::{AppConfig, PersistConfig};
use rand::Rng;
use std::time::Duration;

/// Configuration for a [`crate::ClientContext`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on every CRUD call.
    pub request_timeout: Duration,
    /// Realtime channel settings.
    pub channel: ChannelConfig,
    /// Backup timer period. `None` uses the persisted config record.
    pub backup_interval: Option<Duration>,
    /// Local persistence settings.
    pub persist: PersistConfig,
}

impl EngineConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            channel: ChannelConfig::default(),
            backup_interval: None,
            persist: PersistConfig::default().with_data_format_version(CURRENT_FORMAT_VERSION),
        }
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the realtime channel configuration.
    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    /// Overrides the backup timer period.
    pub fn with_backup_interval(mut self, interval: Duration) -> Self {
        self.backup_interval = Some(interval);
        self
    }

    /// Sets the local persistence configuration.
    ///
    /// The data-format version is always the codec's current version.
    pub fn with_persist(mut self, persist: PersistConfig) -> Self {
        self.persist = persist.with_data_format_version(CURRENT_FORMAT_VERSION);
        self
    }

    /// The backup period to use given the persisted config record.
    pub fn effective_backup_interval(&self, app: &AppConfig) -> Duration {
        self.backup_interval
            .unwrap_or_else(|| Duration::from_secs(app.backup_interval_secs.max(1)))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the realtime channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Whether the channel may be started at all.
    pub enabled: bool,
    /// Connection attempt policy.
    pub retry: RetryConfig,
    /// Whether to refresh the replica after a reconnection.
    pub refresh_on_reconnect: bool,
}

impl ChannelConfig {
    /// Creates a channel configuration with default settings.
    pub fn new() -> Self {
        Self {
            enabled: true,
            retry: RetryConfig::default(),
            refresh_on_reconnect: true,
        }
    }

    /// Enables or disables the channel.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Enables or disables refresh after reconnection.
    pub fn with_refresh_on_reconnect(mut self, refresh: bool) -> Self {
        self.refresh_on_reconnect = refresh;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts per connection cycle.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier applied per attempt. 1.0 keeps the delay fixed.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub add_jitter: bool,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 1.0,
            add_jitter: false,
            attempt_timeout: Duration::from_secs(20),
        }
    }

    /// Creates a configuration with a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Self::new(1)
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        // A negative or NaN multiplier must not yield a negative delay.
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64()).max(0.0);

        let delay_secs = if self.add_jitter && delay_secs > 0.0 {
            delay_secs + delay_secs * rand::thread_rng().gen_range(0.0..0.25)
        } else {
            delay_secs
        };
        Duration::try_from_secs_f64(delay_secs).unwrap_or(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}
