//! Canonical error types for the crate.
//!
//! Configuration problems are rejected before anything reaches the transport.
//! Fatal broker statuses and heartbeat silence surface as distinct variants so
//! callers can tell an explicit rejection from a quiet connection.

use std::time::Duration;

use thiserror::Error;

use crate::frame::Status;

/// Invalid options rejected when a request or option set is built.
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Batch sizes must be at least one message.
    #[error("invalid batch size {0}; must be >= 1")]
    InvalidBatchSize(usize),
    /// Threshold percentages must lie in `1..=100`.
    #[error("invalid threshold percent {0}; must be between 1 and 100")]
    InvalidThreshold(u8),
    /// The expiry is shorter than the broker accepts.
    #[error("expires in {actual:?} is below the minimum of {min:?}")]
    ExpiresTooShort {
        /// Smallest accepted expiry.
        min: Duration,
        /// Expiry that was supplied.
        actual: Duration,
    },
    /// A wait that must be bounded was given a zero duration.
    #[error("a non-zero timeout is required")]
    MissingTimeout,
    /// The idle heartbeat exceeds the supported maximum.
    #[error("idle heartbeat {actual:?} exceeds the maximum of {max:?}")]
    HeartbeatTooLong {
        /// Largest accepted idle heartbeat.
        max: Duration,
        /// Heartbeat that was supplied.
        actual: Duration,
    },
    /// The idle heartbeat must be less than half of the request expiry.
    #[error("idle heartbeat {heartbeat:?} must be less than half of expires in {expires:?}")]
    HeartbeatExceedsExpiry {
        /// Heartbeat that was supplied.
        heartbeat: Duration,
        /// Expiry that was supplied.
        expires: Duration,
    },
}

/// Fatal protocol status reported by the broker.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("pull status error {code}: {text}")]
pub struct StatusError {
    /// Numeric status code.
    pub code: u16,
    /// Human readable status description.
    pub text: String,
}

impl From<&Status> for StatusError {
    fn from(status: &Status) -> Self {
        Self {
            code: status.code(),
            text: status.text().to_owned(),
        }
    }
}

/// Raised when no frame arrived within the heartbeat alarm period while
/// demand was outstanding.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("no heartbeat or message received for {silent_for:?} while demand was outstanding")]
pub struct LivenessError {
    /// How long the feed had been silent when the alarm fired.
    pub silent_for: Duration,
}

/// Failures reported by a [`crate::transport::PullTransport`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is gone and cannot carry requests.
    #[error("transport closed")]
    Closed,
    /// The pull request could not be encoded.
    #[error("failed to encode pull request")]
    Encode(#[source] serde_json::Error),
    /// Implementation specific failure.
    #[error("transport failure: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors surfaced by the consumption disciplines.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// Options were rejected before reaching the transport.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The broker rejected the pull with a fatal status.
    #[error(transparent)]
    Status(#[from] StatusError),
    /// The heartbeat alarm fired.
    #[error(transparent)]
    Liveness(#[from] LivenessError),
    /// The transport failed to carry a request.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The consumer was stopped or drained.
    #[error("consumer is closed")]
    Closed,
}

impl ConsumerError {
    /// Returns the status error when this is a protocol rejection.
    #[must_use]
    pub fn as_status(&self) -> Option<&StatusError> {
        match self {
            Self::Status(status) => Some(status),
            _ => None,
        }
    }

    /// Returns true when the heartbeat alarm produced this error.
    #[must_use]
    pub fn is_liveness(&self) -> bool { matches!(self, Self::Liveness(_)) }
}
