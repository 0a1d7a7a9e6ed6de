//! Poll configuration and the named policies used across the client.

use std::time::Duration;

/// Cap applied to error backoff when `max_interval` is unset.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(300);

/// Configuration for one recurring job.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    /// Unique name; starting a poll with an existing key replaces it.
    pub key: String,
    /// Base delay between successful runs
    pub interval: Duration,
    /// Upper bound for error backoff
    pub max_interval: Option<Duration>,
    /// Growth factor per consecutive error (exponent capped at 5)
    pub backoff_multiplier: Option<f64>,
    /// Run right away when the window regains focus or becomes visible
    pub immediate_on_focus: bool,
    /// Slow down to at least 2x (and no less than 2 minutes) while the user is idle
    pub pause_when_inactive: bool,
    /// When set, the poll gives up after `max_retries` consecutive errors
    pub retry_on_error: bool,
    pub max_retries: u32,
}

impl PollConfig {
    pub fn new(key: impl Into<String>, interval: Duration) -> Self {
        Self {
            key: key.into(),
            interval,
            max_interval: None,
            backoff_multiplier: None,
            immediate_on_focus: false,
            pause_when_inactive: false,
            retry_on_error: true,
            max_retries: 3,
        }
    }

    pub fn max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = Some(max_interval);
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    pub fn immediate_on_focus(mut self, enabled: bool) -> Self {
        self.immediate_on_focus = enabled;
        self
    }

    pub fn pause_when_inactive(mut self, enabled: bool) -> Self {
        self.pause_when_inactive = enabled;
        self
    }

    pub fn retry_on_error(mut self, enabled: bool) -> Self {
        self.retry_on_error = enabled;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Dashboard data: frequent, refreshed on focus, idles when the user does.
    pub fn dashboard(key: impl Into<String>) -> Self {
        Self::new(key, Duration::from_secs(30))
            .max_interval(Duration::from_secs(300))
            .backoff_multiplier(1.5)
            .immediate_on_focus(true)
            .pause_when_inactive(true)
    }

    /// Round timers must stay accurate even for idle users.
    pub fn round_timer(key: impl Into<String>) -> Self {
        Self::new(key, Duration::from_secs(5))
            .max_interval(Duration::from_secs(15))
            .backoff_multiplier(1.5)
            .immediate_on_focus(true)
            .pause_when_inactive(false)
            .max_retries(5)
    }

    pub fn detail_view(key: impl Into<String>) -> Self {
        Self::new(key, Duration::from_secs(60))
            .max_interval(Duration::from_secs(300))
            .backoff_multiplier(1.5)
            .immediate_on_focus(true)
            .pause_when_inactive(true)
    }

    pub fn balance(key: impl Into<String>) -> Self {
        Self::new(key, Duration::from_secs(120))
            .max_interval(Duration::from_secs(600))
            .backoff_multiplier(1.5)
            .immediate_on_focus(false)
            .pause_when_inactive(true)
    }

    /// Shallow-merge `update` into this config.
    pub fn apply(&mut self, update: PollConfigUpdate) {
        if let Some(interval) = update.interval {
            self.interval = interval;
        }
        if let Some(max_interval) = update.max_interval {
            self.max_interval = Some(max_interval);
        }
        if let Some(multiplier) = update.backoff_multiplier {
            self.backoff_multiplier = Some(multiplier);
        }
        if let Some(enabled) = update.immediate_on_focus {
            self.immediate_on_focus = enabled;
        }
        if let Some(enabled) = update.pause_when_inactive {
            self.pause_when_inactive = enabled;
        }
        if let Some(enabled) = update.retry_on_error {
            self.retry_on_error = enabled;
        }
        if let Some(max_retries) = update.max_retries {
            self.max_retries = max_retries;
        }
    }
}

/// Partial config for [`crate::PollingManager::update_poll_config`]; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollConfigUpdate {
    pub interval: Option<Duration>,
    pub max_interval: Option<Duration>,
    pub backoff_multiplier: Option<f64>,
    pub immediate_on_focus: Option<bool>,
    pub pause_when_inactive: Option<bool>,
    pub retry_on_error: Option<bool>,
    pub max_retries: Option<u32>,
}
