//! Classification of inbound frames.
//!
//! [`MessageManager`] is the first stop for every frame a subscription
//! receives. It refreshes liveness, lets the demand tracker account the frame
//! and reduces the frame to a [`Managed`] outcome for the active discipline.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    demand::DemandTracker,
    frame::{Frame, Message, Status},
    heartbeat::HeartbeatMonitor,
    metrics,
    status::{self, StatusDisposition},
};

/// Result of classifying one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Managed {
    /// A message, already accounted against demand.
    Message(Message),
    /// A heartbeat; liveness was recorded and nothing else happens.
    Heartbeat,
    /// The current batch ended without error.
    Terminus(Status),
    /// An advisory status for the warning callback.
    Warning(Status),
    /// A fatal status.
    Error(Status),
}

/// Frame classifier composed with a pluggable [`DemandTracker`].
#[derive(Clone)]
pub struct MessageManager {
    tracker: Arc<dyn DemandTracker>,
    monitor: HeartbeatMonitor,
}

impl std::fmt::Debug for MessageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageManager")
            .field("pending", &self.tracker.pending())
            .field("monitor", &self.monitor)
            .finish()
    }
}

impl MessageManager {
    #[must_use]
    pub fn new(tracker: Arc<dyn DemandTracker>, monitor: HeartbeatMonitor) -> Self {
        Self { tracker, monitor }
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<dyn DemandTracker> { &self.tracker }

    #[must_use]
    pub fn monitor(&self) -> &HeartbeatMonitor { &self.monitor }

    /// Classify `frame`, updating liveness and demand.
    ///
    /// Never fails: fatal statuses are returned as [`Managed::Error`] for the
    /// caller to surface.
    pub fn manage(&self, frame: Frame) -> Managed {
        self.monitor.record_frame();
        match frame {
            Frame::Message(message) => {
                self.tracker.track_message(&message);
                metrics::inc_messages();
                trace!(subject = message.subject(), "message accounted");
                Managed::Message(message)
            }
            Frame::Status(status) if status.is_heartbeat() => {
                trace!(text = status.text(), "heartbeat received");
                Managed::Heartbeat
            }
            Frame::Status(status) => {
                self.tracker.reconcile(&status);
                let disposition = status::interpret(&status);
                metrics::inc_status(disposition);
                debug!(
                    code = status.code(),
                    text = status.text(),
                    disposition = disposition.as_str(),
                    "status received"
                );
                match disposition {
                    StatusDisposition::Terminus => Managed::Terminus(status),
                    StatusDisposition::Warning => Managed::Warning(status),
                    StatusDisposition::Error => Managed::Error(status),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{
        demand::{NoopDemandTracker, PullDemandTracker},
        frame::Headers,
        pull::PullRequest,
        status::{PENDING_BYTES_HEADER, PENDING_MESSAGES_HEADER},
    };

    #[fixture]
    fn manager() -> MessageManager {
        let monitor = HeartbeatMonitor::new();
        let tracker = Arc::new(PullDemandTracker::new(monitor.clone()));
        MessageManager::new(tracker, monitor)
    }

    #[rstest]
    fn messages_consume_demand(manager: MessageManager) {
        manager
            .tracker()
            .start_pull_request(&PullRequest::batch(3).expect("valid"));
        let message = Message::new("orders", "a");
        assert_eq!(
            manager.manage(message.clone().into()),
            Managed::Message(message)
        );
        assert_eq!(manager.tracker().pending().messages, 2);
    }

    #[rstest]
    fn heartbeats_do_not_consume_demand(manager: MessageManager) {
        manager
            .tracker()
            .start_pull_request(&PullRequest::batch(3).expect("valid"));
        let managed = manager.manage(Status::new(100, "Idle Heartbeat").into());
        assert_eq!(managed, Managed::Heartbeat);
        assert_eq!(manager.tracker().pending().messages, 3);
    }

    #[rstest]
    #[case(Status::new(404, "No Messages"), true)]
    #[case(Status::new(409, "Exceeded MaxWaiting"), false)]
    fn statuses_are_routed(manager: MessageManager, #[case] status: Status, #[case] terminus: bool) {
        let managed = manager.manage(status.clone().into());
        if terminus {
            assert_eq!(managed, Managed::Terminus(status));
        } else {
            assert_eq!(managed, Managed::Warning(status));
        }
    }

    #[rstest]
    fn fatal_status_is_returned_not_raised(manager: MessageManager) {
        let status = Status::new(409, "Consumer Deleted");
        assert_eq!(manager.manage(status.clone().into()), Managed::Error(status));
    }

    #[rstest]
    fn terminus_reconciles_pending(manager: MessageManager) {
        manager
            .tracker()
            .start_pull_request(&PullRequest::batch(10).expect("valid"));
        let status = Status::new(408, "Request Timeout").with_headers(
            Headers::new()
                .with(PENDING_MESSAGES_HEADER, "10")
                .with(PENDING_BYTES_HEADER, "0"),
        );
        let _ = manager.manage(status.into());
        assert!(manager.tracker().pending().is_exhausted());
    }

    #[test]
    fn noop_tracker_composes_with_classifier() {
        let manager = MessageManager::new(Arc::new(NoopDemandTracker), HeartbeatMonitor::new());
        let managed = manager.manage(Message::new("s", "x").into());
        assert!(matches!(managed, Managed::Message(_)));
    }
}
