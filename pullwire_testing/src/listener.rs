//! Listener recording every callback for later assertions.

use std::sync::{Arc, Mutex, PoisonError};

use pullwire::{
    ConsumerContext,
    SubscriptionConfig,
    error::LivenessError,
    frame::Status,
    listener::ConsumerListener,
    loopback::LoopbackBroker,
};

/// Callbacks observed by a [`RecordingListener`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Recorded {
    pub warnings: Vec<Status>,
    pub errors: Vec<Status>,
    pub alarms: Vec<LivenessError>,
}

/// Listener that stores callbacks instead of logging them.
#[derive(Clone, Debug, Default)]
pub struct RecordingListener {
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingListener {
    /// Snapshot of everything recorded so far.
    pub fn recorded(&self) -> Recorded {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn with(&self, f: impl FnOnce(&mut Recorded)) {
        f(&mut self.recorded.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

impl ConsumerListener for RecordingListener {
    fn pull_status_warning(&self, _inbox: &str, status: &Status) {
        self.with(|r| r.warnings.push(status.clone()));
    }

    fn pull_status_error(&self, _inbox: &str, status: &Status) {
        self.with(|r| r.errors.push(status.clone()));
    }

    fn heartbeat_alarm(&self, _inbox: &str, error: &LivenessError) {
        self.with(|r| r.alarms.push(*error));
    }
}

/// A context on `broker` whose subscriptions report to a fresh
/// [`RecordingListener`].
pub fn recording_context(broker: &LoopbackBroker) -> (ConsumerContext, RecordingListener) {
    let listener = RecordingListener::default();
    let config = SubscriptionConfig {
        listener: Arc::new(listener.clone()),
        ..SubscriptionConfig::default()
    };
    (
        ConsumerContext::with_config(Arc::new(broker.clone()), config),
        listener,
    )
}
