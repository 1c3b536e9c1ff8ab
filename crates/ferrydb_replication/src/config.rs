//! Configuration for replication sessions.

use std::time::Duration;

use rand::Rng;

use crate::error::{ReplicationError, ReplicationResult};

/// Default number of documents per batch in either direction.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Pull direction settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOptions {
    /// Maximum documents requested per pull call.
    pub batch_size: usize,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Push direction settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOptions {
    /// Maximum documents uploaded per push call.
    pub batch_size: usize,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Configuration of one replication session.
///
/// The endpoint identity is derived from `database`, the collection name and
/// `identifier`, so two sessions that differ only in identifier keep
/// separate checkpoints.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Name of the local database.
    pub database: String,
    /// Identifies the remote endpoint, e.g. its URL.
    pub identifier: String,
    /// Pull settings; `None` disables pulling.
    pub pull: Option<PullOptions>,
    /// Push settings; `None` disables pushing.
    pub push: Option<PushOptions>,
    /// Keep replicating after the initial drain.
    pub live: bool,
    /// Polling interval while idle in live mode.
    pub live_interval: Duration,
    /// Backoff after failed rounds.
    pub retry: RetryConfig,
    /// Start as soon as the session is created.
    pub auto_start: bool,
}

impl ReplicationConfig {
    /// Creates a configuration replicating in both directions, live.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            database: "ferrydb".to_string(),
            identifier: identifier.into(),
            pull: Some(PullOptions::default()),
            push: Some(PushOptions::default()),
            live: true,
            live_interval: Duration::from_secs(10),
            retry: RetryConfig::default(),
            auto_start: true,
        }
    }

    /// Sets the database name used for the endpoint identity.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Enables pulling with the given batch size.
    pub fn with_pull_batch_size(mut self, batch_size: usize) -> Self {
        self.pull = Some(PullOptions { batch_size });
        self
    }

    /// Enables pushing with the given batch size.
    pub fn with_push_batch_size(mut self, batch_size: usize) -> Self {
        self.push = Some(PushOptions { batch_size });
        self
    }

    /// Pull only.
    pub fn pull_only(mut self) -> Self {
        self.pull.get_or_insert_with(PullOptions::default);
        self.push = None;
        self
    }

    /// Push only.
    pub fn push_only(mut self) -> Self {
        self.push.get_or_insert_with(PushOptions::default);
        self.pull = None;
        self
    }

    /// Sets live mode.
    pub fn with_live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    /// Sets the idle polling interval for live mode.
    pub fn with_live_interval(mut self, interval: Duration) -> Self {
        self.live_interval = interval;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets whether the session starts on creation.
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Checks the configuration for values the engine cannot run with.
    pub fn validate(&self) -> ReplicationResult<()> {
        if self.pull.is_none() && self.push.is_none() {
            return Err(ReplicationError::Configuration(
                "neither pull nor push is configured".into(),
            ));
        }
        if self.identifier.is_empty() {
            return Err(ReplicationError::Configuration(
                "replication identifier must not be empty".into(),
            ));
        }
        let zero_pull = self.pull.as_ref().is_some_and(|p| p.batch_size == 0);
        let zero_push = self.push.as_ref().is_some_and(|p| p.batch_size == 0);
        if zero_pull || zero_push {
            return Err(ReplicationError::Configuration(
                "batch size must be at least 1".into(),
            ));
        }
        if self.live && self.live_interval.is_zero() {
            return Err(ReplicationError::Configuration(
                "live interval must be positive".into(),
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if !(multiplier.is_finite() && multiplier >= 1.0) {
            return Err(ReplicationError::Configuration(format!(
                "backoff multiplier must be a finite number of at least 1, got {multiplier}"
            )));
        }
        Ok(())
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

/// Backoff between failed rounds.
///
/// Retries never give up; a session keeps trying until it is cancelled.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Ceiling for the delay.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a configuration starting at `initial_delay`.
    pub fn new(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// The same delay after every failure, without jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
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

    /// Sets whether jitter is added.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Delay before retry number `attempt` (1 for the first retry).
    ///
    /// Never exceeds `max_delay`, jitter included.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        // A multiplier below zero or NaN yields no usable growth.
        let capped = if base.is_nan() || base < 0.0 {
            self.initial_delay.min(self.max_delay).as_secs_f64()
        } else {
            base.min(max)
        };

        let secs = if self.add_jitter && capped > 0.0 {
            capped + capped * rand::thread_rng().gen_range(0.0..0.25)
        } else {
            capped
        };
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
