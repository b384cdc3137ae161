// Client configuration
// Plain structs with defaults; the binary layers a few environment overrides on top.

use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub retry_config: RetryConfig,
    pub cache_config: CacheConfig,
    pub operating_hours: OperatingHours,
    pub sync_config: SyncConfig,
    pub booking_policy: BookingPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            timeout_ms: 10_000,
            retry_config: RetryConfig::default(),
            cache_config: CacheConfig::default(),
            operating_hours: OperatingHours::default(),
            sync_config: SyncConfig::default(),
            booking_policy: BookingPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub const BASE_URL_VAR: &'static str = "SLOT_SYNC_BASE_URL";
    pub const TIMEOUT_VAR: &'static str = "SLOT_SYNC_TIMEOUT_MS";
    pub const POLL_INTERVAL_VAR: &'static str = "SLOT_SYNC_POLL_INTERVAL_SECS";

    /// Defaults overridden by any `SLOT_SYNC_*` variables that are set.
    /// Unparseable numeric values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(base_url) = lookup(Self::BASE_URL_VAR) {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }

        if let Some(raw) = lookup(Self::TIMEOUT_VAR) {
            match raw.parse() {
                Ok(timeout_ms) => config.timeout_ms = timeout_ms,
                Err(_) => warn!(var = Self::TIMEOUT_VAR, value = %raw, "ignoring invalid value"),
            }
        }

        if let Some(raw) = lookup(Self::POLL_INTERVAL_VAR) {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => {
                    config.sync_config.poll_interval = Duration::from_secs(secs)
                }
                _ => warn!(var = Self::POLL_INTERVAL_VAR, value = %raw, "ignoring invalid value"),
            }
        }

        config
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// Retry policy for cache reads. Mutations are never retried.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff for the given attempt (0-based) with jitter applied.
    pub fn backoff(&self, retry_attempt: u32) -> Duration {
        let base_backoff_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powf(retry_attempt as f64))
        .min(self.max_backoff_ms as f64);

        let jitter = rand::random::<f64>() * self.jitter_factor * base_backoff_ms;
        let backoff_ms = base_backoff_ms * (1.0 - self.jitter_factor / 2.0) + jitter;

        Duration::from_millis(backoff_ms as u64)
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Entries older than this are served as stale and revalidated.
    /// `None` keeps an entry fresh until it is invalidated.
    pub stale_after: Option<Duration>,
}

/// Daily window in which resources can be booked, in whole hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingHours {
    pub open_hour: u32,
    pub close_hour: u32,
    pub slot_minutes: u32,
}

impl Default for OperatingHours {
    fn default() -> Self {
        Self {
            open_hour: 7,
            close_hour: 19,
            slot_minutes: 60,
        }
    }
}

impl OperatingHours {
    pub fn hours(&self) -> std::ops::Range<u32> {
        self.open_hour..self.close_hour
    }

    pub fn contains(&self, hour: u32) -> bool {
        self.hours().contains(&hour)
    }

    pub fn start_time(&self) -> String {
        format!("{:02}:00", self.open_hour)
    }

    pub fn end_time(&self) -> String {
        format!("{:02}:00", self.close_hour)
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingPolicy {
    /// Inclusive number of days after today that can still be booked.
    pub horizon_days: i64,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self { horizon_days: 3 }
    }
}
