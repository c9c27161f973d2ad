//! Callbacks for conditions that do not interrupt a blocking call.
//!
//! Advisory statuses only ever reach [`ConsumerListener::pull_status_warning`].
//! Fatal statuses and heartbeat alarms are also reported here; synchronous
//! callers additionally receive them as errors.

use crate::{
    error::{LivenessError, StatusError},
    frame::Status,
};

/// Receives warnings and errors observed on a subscription.
///
/// Every method defaults to logging through `tracing`.
///
/// ```rust,ignore
/// use pullwire::{frame::Status, listener::ConsumerListener};
///
/// struct Alerting;
///
/// impl ConsumerListener for Alerting {
///     fn pull_status_error(&self, inbox: &str, status: &Status) {
///         page_on_call(inbox, status.text());
///     }
/// }
/// ```
pub trait ConsumerListener: Send + Sync + 'static {
    /// An advisory conflict such as exceeding the broker's pull limits.
    fn pull_status_warning(&self, inbox: &str, status: &Status) {
        tracing::warn!(
            inbox,
            code = status.code(),
            text = status.text(),
            "pull status warning"
        );
    }

    /// A fatal status. The subscription stays open but further pulls are
    /// futile until the consumer is fixed externally.
    fn pull_status_error(&self, inbox: &str, status: &Status) {
        let error = StatusError::from(status);
        tracing::error!(inbox, code = error.code, text = %error.text, "pull status error");
    }

    /// The feed went silent while demand was outstanding.
    fn heartbeat_alarm(&self, inbox: &str, error: &LivenessError) {
        tracing::warn!(inbox, silent_for = ?error.silent_for, "heartbeat alarm");
    }
}

/// Listener that only logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingListener;

impl ConsumerListener for LoggingListener {}
