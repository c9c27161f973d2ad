//! Consumption options for the continuous and fetch disciplines.
//!
//! Both option sets are immutable once built and are validated in `build`, so
//! an invalid configuration never reaches the transport.

use std::time::Duration;

use crate::{error::ConfigError, pull::PullRequest};

/// Default messages requested per batch by continuous consumers.
pub const DEFAULT_BATCH_SIZE: usize = 500;
/// Default messages requested by a fetch.
pub const DEFAULT_FETCH_MESSAGES: usize = 100;
/// Default request expiry.
pub const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(30);
/// Shortest expiry accepted for consumer requests.
pub const MIN_EXPIRES_IN: Duration = Duration::from_secs(1);
/// Longest idle heartbeat accepted for consumer requests.
pub const MAX_IDLE_HEARTBEAT: Duration = Duration::from_secs(30);
/// Default percentage of a batch that must be consumed before a refill.
pub const DEFAULT_THRESHOLD_PERCENT: u8 = 50;
/// Percentage of the expiry used as the derived idle heartbeat.
const IDLE_HEARTBEAT_PERCENT: u32 = 50;

/// Idle heartbeat derived from an expiry when none is configured.
fn derived_idle_heartbeat(expires_in: Duration) -> Duration {
    (expires_in * IDLE_HEARTBEAT_PERCENT / 100).min(MAX_IDLE_HEARTBEAT)
}

fn validate_timing(expires_in: Duration, idle_heartbeat: Duration) -> Result<(), ConfigError> {
    if expires_in < MIN_EXPIRES_IN {
        return Err(ConfigError::ExpiresTooShort {
            min: MIN_EXPIRES_IN,
            actual: expires_in,
        });
    }
    if idle_heartbeat > MAX_IDLE_HEARTBEAT {
        return Err(ConfigError::HeartbeatTooLong {
            max: MAX_IDLE_HEARTBEAT,
            actual: idle_heartbeat,
        });
    }
    if idle_heartbeat > expires_in / 2 {
        return Err(ConfigError::HeartbeatExceedsExpiry {
            heartbeat: idle_heartbeat,
            expires: expires_in,
        });
    }
    Ok(())
}

/// Options for the continuous, handler-driven consumer and the manual
/// consumer.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use pullwire::options::ConsumeOptions;
///
/// let options = ConsumeOptions::builder()
///     .batch_size(10)
///     .threshold_percent(50)
///     .expires_in(Duration::from_secs(5))
///     .build()
///     .expect("valid options");
/// assert_eq!(options.idle_heartbeat(), Duration::from_millis(2_500));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumeOptions {
    batch_size: usize,
    batch_bytes: u64,
    expires_in: Duration,
    idle_heartbeat: Duration,
    threshold_percent: u8,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_bytes: 0,
            expires_in: DEFAULT_EXPIRES_IN,
            idle_heartbeat: derived_idle_heartbeat(DEFAULT_EXPIRES_IN),
            threshold_percent: DEFAULT_THRESHOLD_PERCENT,
        }
    }
}

impl ConsumeOptions {
    #[must_use]
    pub fn builder() -> ConsumeOptionsBuilder { ConsumeOptionsBuilder::default() }

    #[must_use]
    pub fn batch_size(&self) -> usize { self.batch_size }

    /// Byte budget per batch; zero means unbounded.
    #[must_use]
    pub fn batch_bytes(&self) -> u64 { self.batch_bytes }

    #[must_use]
    pub fn expires_in(&self) -> Duration { self.expires_in }

    #[must_use]
    pub fn idle_heartbeat(&self) -> Duration { self.idle_heartbeat }

    #[must_use]
    pub fn threshold_percent(&self) -> u8 { self.threshold_percent }

    /// The full-size request issued when consumption starts.
    pub(crate) fn initial_request(&self) -> Result<PullRequest, ConfigError> {
        PullRequest::builder(self.batch_size)
            .max_bytes(self.batch_bytes)
            .expires_in(self.expires_in)
            .idle_heartbeat(self.idle_heartbeat)
            .build()
    }
}

/// Builder for [`ConsumeOptions`].
#[derive(Clone, Debug, Default)]
pub struct ConsumeOptionsBuilder {
    batch_size: Option<usize>,
    batch_bytes: Option<u64>,
    expires_in: Option<Duration>,
    idle_heartbeat: Option<Duration>,
    threshold_percent: Option<u8>,
}

impl ConsumeOptionsBuilder {
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    #[must_use]
    pub fn batch_bytes(mut self, batch_bytes: u64) -> Self {
        self.batch_bytes = Some(batch_bytes);
        self
    }

    #[must_use]
    pub fn expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    /// Override the idle heartbeat derived from the expiry.
    #[must_use]
    pub fn idle_heartbeat(mut self, idle_heartbeat: Duration) -> Self {
        self.idle_heartbeat = Some(idle_heartbeat);
        self
    }

    #[must_use]
    pub fn threshold_percent(mut self, threshold_percent: u8) -> Self {
        self.threshold_percent = Some(threshold_percent);
        self
    }

    /// Validate and freeze the options.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the batch size is zero, the threshold
    /// is outside `1..=100`, or the expiry and heartbeat are inconsistent.
    pub fn build(self) -> Result<ConsumeOptions, ConfigError> {
        let defaults = ConsumeOptions::default();
        let batch_size = self.batch_size.unwrap_or(defaults.batch_size);
        if batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        let threshold_percent = self.threshold_percent.unwrap_or(defaults.threshold_percent);
        if !(1..=100).contains(&threshold_percent) {
            return Err(ConfigError::InvalidThreshold(threshold_percent));
        }
        let expires_in = self.expires_in.unwrap_or(defaults.expires_in);
        let idle_heartbeat = self
            .idle_heartbeat
            .unwrap_or_else(|| derived_idle_heartbeat(expires_in));
        validate_timing(expires_in, idle_heartbeat)?;
        Ok(ConsumeOptions {
            batch_size,
            batch_bytes: self.batch_bytes.unwrap_or(defaults.batch_bytes),
            expires_in,
            idle_heartbeat,
            threshold_percent,
        })
    }
}

/// Options for a one-shot bounded fetch.
///
/// # Examples
///
/// ```
/// use pullwire::options::FetchConsumeOptions;
///
/// let options = FetchConsumeOptions::builder()
///     .max_messages(10)
///     .build()
///     .expect("valid options");
/// assert_eq!(options.max_messages(), 10);
/// assert_eq!(options.max_bytes(), 0);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchConsumeOptions {
    max_messages: usize,
    max_bytes: u64,
    expires_in: Duration,
    idle_heartbeat: Duration,
}

impl Default for FetchConsumeOptions {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_FETCH_MESSAGES,
            max_bytes: 0,
            expires_in: DEFAULT_EXPIRES_IN,
            idle_heartbeat: derived_idle_heartbeat(DEFAULT_EXPIRES_IN),
        }
    }
}

impl FetchConsumeOptions {
    #[must_use]
    pub fn builder() -> FetchConsumeOptionsBuilder { FetchConsumeOptionsBuilder::default() }

    #[must_use]
    pub fn max_messages(&self) -> usize { self.max_messages }

    /// Byte budget for the fetch; zero means unbounded.
    #[must_use]
    pub fn max_bytes(&self) -> u64 { self.max_bytes }

    #[must_use]
    pub fn expires_in(&self) -> Duration { self.expires_in }

    #[must_use]
    pub fn idle_heartbeat(&self) -> Duration { self.idle_heartbeat }

    pub(crate) fn request(&self) -> Result<PullRequest, ConfigError> {
        PullRequest::builder(self.max_messages)
            .max_bytes(self.max_bytes)
            .expires_in(self.expires_in)
            .idle_heartbeat(self.idle_heartbeat)
            .build()
    }
}

/// Builder for [`FetchConsumeOptions`].
#[derive(Clone, Debug, Default)]
pub struct FetchConsumeOptionsBuilder {
    max_messages: Option<usize>,
    max_bytes: Option<u64>,
    expires_in: Option<Duration>,
    idle_heartbeat: Option<Duration>,
}

impl FetchConsumeOptionsBuilder {
    #[must_use]
    pub fn max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = Some(max_messages);
        self
    }

    /// Limit the fetch by bytes as well as messages.
    #[must_use]
    pub fn max_bytes(mut self, max_bytes: u64, max_messages: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self.max_messages = Some(max_messages);
        self
    }

    #[must_use]
    pub fn expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    #[must_use]
    pub fn idle_heartbeat(mut self, idle_heartbeat: Duration) -> Self {
        self.idle_heartbeat = Some(idle_heartbeat);
        self
    }

    /// Validate and freeze the options.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when `max_messages` is zero or the expiry
    /// and heartbeat are inconsistent.
    pub fn build(self) -> Result<FetchConsumeOptions, ConfigError> {
        let defaults = FetchConsumeOptions::default();
        let max_messages = self.max_messages.unwrap_or(defaults.max_messages);
        if max_messages == 0 {
            return Err(ConfigError::InvalidBatchSize(max_messages));
        }
        let expires_in = self.expires_in.unwrap_or(defaults.expires_in);
        let idle_heartbeat = self
            .idle_heartbeat
            .unwrap_or_else(|| derived_idle_heartbeat(expires_in));
        validate_timing(expires_in, idle_heartbeat)?;
        Ok(FetchConsumeOptions {
            max_messages,
            max_bytes: self.max_bytes.unwrap_or(defaults.max_bytes),
            expires_in,
            idle_heartbeat,
        })
    }
}
