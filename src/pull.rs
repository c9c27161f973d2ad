//! Pull requests sent to the broker to create demand.

use std::time::Duration;

use serde::{Deserialize, Serialize, de::Error as _};

use crate::error::ConfigError;

/// Immutable request for up to `batch_size` messages and, when `max_bytes` is
/// non-zero, up to `max_bytes` bytes.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use pullwire::pull::PullRequest;
///
/// let request = PullRequest::builder(10)
///     .max_bytes(1_000)
///     .expires_in(Duration::from_secs(1))
///     .build()
///     .expect("valid request");
/// assert_eq!(request.batch_size(), 10);
/// assert_eq!(request.max_bytes(), 1_000);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullRequest {
    batch_size: usize,
    max_bytes: u64,
    expires_in: Option<Duration>,
    idle_heartbeat: Option<Duration>,
    no_wait: bool,
}

#[derive(Serialize, Deserialize)]
struct WirePullRequest {
    batch: usize,
    #[serde(default, skip_serializing_if = "is_zero")]
    max_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    idle_heartbeat: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    no_wait: bool,
}

#[expect(
    clippy::trivially_copy_pass_by_ref,
    reason = "serde skip predicates receive a reference"
)]
fn is_zero(value: &u64) -> bool { *value == 0 }

fn nanos(duration: Duration) -> u64 { u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX) }

impl PullRequest {
    /// Start building a request for `batch_size` messages.
    #[must_use]
    pub fn builder(batch_size: usize) -> PullRequestBuilder { PullRequestBuilder::new(batch_size) }

    /// Request `batch_size` messages with no other limits.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBatchSize`] when `batch_size` is zero.
    pub fn batch(batch_size: usize) -> Result<Self, ConfigError> { Self::builder(batch_size).build() }

    /// Request `batch_size` messages, ending immediately if fewer are
    /// available.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBatchSize`] when `batch_size` is zero.
    pub fn no_wait(batch_size: usize) -> Result<Self, ConfigError> {
        Self::builder(batch_size).no_wait(true).build()
    }

    #[must_use]
    pub fn batch_size(&self) -> usize { self.batch_size }

    /// Byte budget; zero means unbounded.
    #[must_use]
    pub fn max_bytes(&self) -> u64 { self.max_bytes }

    #[must_use]
    pub fn expires_in(&self) -> Option<Duration> { self.expires_in }

    #[must_use]
    pub fn idle_heartbeat(&self) -> Option<Duration> { self.idle_heartbeat }

    #[must_use]
    pub fn is_no_wait(&self) -> bool { self.no_wait }

    /// Render the JSON body the broker expects, durations in nanoseconds.
    ///
    /// # Errors
    ///
    /// Propagates serialization failures from `serde_json`.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&WirePullRequest {
            batch: self.batch_size,
            max_bytes: self.max_bytes,
            expires: self.expires_in.map(nanos),
            idle_heartbeat: self.idle_heartbeat.map(nanos),
            no_wait: self.no_wait,
        })
    }

    /// Parse a JSON pull body as rendered by [`PullRequest::to_json`].
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error for malformed JSON or a zero batch.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        let wire: WirePullRequest = serde_json::from_slice(body)?;
        let mut builder = Self::builder(wire.batch)
            .max_bytes(wire.max_bytes)
            .no_wait(wire.no_wait);
        if let Some(expires) = wire.expires {
            builder = builder.expires_in(Duration::from_nanos(expires));
        }
        if let Some(idle_heartbeat) = wire.idle_heartbeat {
            builder = builder.idle_heartbeat(Duration::from_nanos(idle_heartbeat));
        }
        builder.build().map_err(serde_json::Error::custom)
    }
}

/// Builder for [`PullRequest`].
#[derive(Clone, Debug)]
pub struct PullRequestBuilder {
    batch_size: usize,
    max_bytes: u64,
    expires_in: Option<Duration>,
    idle_heartbeat: Option<Duration>,
    no_wait: bool,
}

impl PullRequestBuilder {
    fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            max_bytes: 0,
            expires_in: None,
            idle_heartbeat: None,
            no_wait: false,
        }
    }

    /// Cap the bytes the broker may deliver for this request.
    #[must_use]
    pub fn max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Let the broker expire the request after `expires_in`.
    ///
    /// A zero duration clears the expiry.
    #[must_use]
    pub fn expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = (!expires_in.is_zero()).then_some(expires_in);
        self
    }

    /// Ask the broker for idle heartbeats while the request is open.
    ///
    /// A zero duration disables heartbeats.
    #[must_use]
    pub fn idle_heartbeat(mut self, idle_heartbeat: Duration) -> Self {
        self.idle_heartbeat = (!idle_heartbeat.is_zero()).then_some(idle_heartbeat);
        self
    }

    #[must_use]
    pub fn no_wait(mut self, no_wait: bool) -> Self {
        self.no_wait = no_wait;
        self
    }

    /// Validate and freeze the request.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBatchSize`] when the batch size is zero.
    pub fn build(self) -> Result<PullRequest, ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }
        Ok(PullRequest {
            batch_size: self.batch_size,
            max_bytes: self.max_bytes,
            expires_in: self.expires_in,
            idle_heartbeat: self.idle_heartbeat,
            no_wait: self.no_wait,
        })
    }
}
