//! Metric helpers for `pullwire`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! the helpers compile to nothing.

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::status::StatusDisposition;

/// Name of the counter tracking issued pull requests.
pub const PULL_REQUESTS: &str = "pullwire_pull_requests_total";
/// Name of the counter tracking accounted messages.
pub const MESSAGES: &str = "pullwire_messages_total";
/// Name of the counter tracking status frames by disposition.
pub const STATUSES: &str = "pullwire_status_total";
/// Name of the counter tracking heartbeat alarms.
pub const HEARTBEAT_ALARMS: &str = "pullwire_heartbeat_alarms_total";

/// Record an issued pull request.
pub fn inc_pull_requests() {
    #[cfg(feature = "metrics")]
    counter!(PULL_REQUESTS).increment(1);
}

/// Record an accounted message.
pub fn inc_messages() {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES).increment(1);
}

/// Record a status frame with its disposition.
pub fn inc_status(disposition: StatusDisposition) {
    #[cfg(feature = "metrics")]
    counter!(STATUSES, "disposition" => disposition.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = disposition;
}

/// Record a heartbeat alarm.
pub fn inc_heartbeat_alarms() {
    #[cfg(feature = "metrics")]
    counter!(HEARTBEAT_ALARMS).increment(1);
}
