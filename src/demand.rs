//! Accounting of outstanding pull demand.
//!
//! [`PullDemandTracker`] owns the pending message and byte counters for one
//! subscription. Every issued pull adds to them and every accounted message or
//! reconciling status subtracts from them, all under a single lock. When either
//! counter reaches zero the accounting window closes: both counters reset,
//! byte tracking stops and the heartbeat alarm is disarmed.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::debug;

use crate::{
    frame::{Message, Status},
    heartbeat::HeartbeatMonitor,
    pull::PullRequest,
    status,
};

/// Snapshot of outstanding demand.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingDemand {
    /// Messages the broker may still deliver.
    pub messages: u64,
    /// Bytes the broker may still deliver; meaningful only while
    /// `tracking_bytes` is set.
    pub bytes: u64,
    /// Whether the most recent outstanding request carried a byte budget.
    pub tracking_bytes: bool,
}

impl PendingDemand {
    /// True when nothing is outstanding.
    #[must_use]
    pub fn is_exhausted(&self) -> bool { self.messages == 0 && !self.tracking_bytes }

    fn add(&mut self, request: &PullRequest) {
        self.messages = self.messages.saturating_add(request.batch_size() as u64);
        self.bytes = self.bytes.saturating_add(request.max_bytes());
        self.tracking_bytes = request.max_bytes() > 0;
    }

    /// Remove a request that never reached the broker. Returns `true` when
    /// no demand is left.
    fn withdraw(&mut self, request: &PullRequest) -> bool {
        self.messages = self.messages.saturating_sub(request.batch_size() as u64);
        self.bytes = self.bytes.saturating_sub(request.max_bytes());
        if self.bytes == 0 {
            self.tracking_bytes = false;
        }
        let closed = self.messages == 0;
        if closed {
            *self = Self::default();
        }
        closed
    }

    /// Subtract delivered demand. Returns `true` when the window closed.
    fn subtract(&mut self, messages: u64, bytes: u64) -> bool {
        self.messages = self.messages.saturating_sub(messages);
        let mut closed = self.messages == 0;
        if self.tracking_bytes {
            self.bytes = self.bytes.saturating_sub(bytes);
            closed |= self.bytes == 0;
        }
        if closed {
            *self = Self::default();
        }
        closed
    }
}

/// Pluggable demand accounting used by the frame classifier.
///
/// Implementations never block beyond a short critical section and never
/// fail; outcomes are observed through [`DemandTracker::pending`].
pub trait DemandTracker: Send + Sync + 'static {
    /// Record a newly issued pull request.
    fn start_pull_request(&self, request: &PullRequest);

    /// Undo [`DemandTracker::start_pull_request`] for a request the
    /// transport failed to publish.
    fn cancel_pull_request(&self, request: &PullRequest);

    /// Account one delivered message.
    fn track_message(&self, message: &Message);

    /// Apply authoritative pending counts carried by a status frame.
    ///
    /// Missing or malformed counts are ignored.
    fn reconcile(&self, status: &Status);

    /// Current outstanding demand.
    fn pending(&self) -> PendingDemand;
}

/// Tracker for consumers whose demand is managed by the broker.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDemandTracker;

impl DemandTracker for NoopDemandTracker {
    fn start_pull_request(&self, _request: &PullRequest) {}

    fn cancel_pull_request(&self, _request: &PullRequest) {}

    fn track_message(&self, _message: &Message) {}

    fn reconcile(&self, _status: &Status) {}

    fn pending(&self) -> PendingDemand { PendingDemand::default() }
}

/// Demand tracker for pull consumers.
///
/// # Examples
///
/// ```
/// use pullwire::{
///     demand::{DemandTracker, PullDemandTracker},
///     frame::Message,
///     heartbeat::HeartbeatMonitor,
///     pull::PullRequest,
/// };
///
/// let tracker = PullDemandTracker::new(HeartbeatMonitor::new());
/// tracker.start_pull_request(&PullRequest::batch(2).expect("valid"));
/// tracker.track_message(&Message::new("orders", "a"));
/// assert_eq!(tracker.pending().messages, 1);
/// tracker.track_message(&Message::new("orders", "b"));
/// assert!(tracker.pending().is_exhausted());
/// ```
#[derive(Debug)]
pub struct PullDemandTracker {
    demand: Mutex<PendingDemand>,
    monitor: HeartbeatMonitor,
    changed: Notify,
}

impl PullDemandTracker {
    #[must_use]
    pub fn new(monitor: HeartbeatMonitor) -> Self {
        Self {
            demand: Mutex::new(PendingDemand::default()),
            monitor,
            changed: Notify::new(),
        }
    }

    fn demand(&self) -> MutexGuard<'_, PendingDemand> {
        self.demand.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track_pending(&self, messages: u64, bytes: u64) {
        let mut demand = self.demand();
        if demand.subtract(messages, bytes) {
            self.monitor.disarm();
            debug!("pull demand exhausted; accounting window closed");
        }
        drop(demand);
        self.changed.notify_waiters();
    }

    /// Wait until outstanding demand is exhausted.
    pub async fn exhausted(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending().is_exhausted() {
                return;
            }
            notified.await;
        }
    }
}

impl DemandTracker for PullDemandTracker {
    fn start_pull_request(&self, request: &PullRequest) {
        let mut demand = self.demand();
        demand.add(request);
        if self.monitor.configure(request.idle_heartbeat()) {
            self.monitor.arm();
        } else {
            self.monitor.disarm();
        }
        debug!(
            batch = request.batch_size(),
            max_bytes = request.max_bytes(),
            pending_messages = demand.messages,
            pending_bytes = demand.bytes,
            "pull request started"
        );
        drop(demand);
        self.changed.notify_waiters();
    }

    fn cancel_pull_request(&self, request: &PullRequest) {
        let mut demand = self.demand();
        if demand.withdraw(request) {
            self.monitor.disarm();
        }
        debug!(
            batch = request.batch_size(),
            max_bytes = request.max_bytes(),
            pending_messages = demand.messages,
            "pull request withdrawn"
        );
        drop(demand);
        self.changed.notify_waiters();
    }

    fn track_message(&self, message: &Message) {
        self.track_pending(1, message.estimated_size() as u64);
    }

    fn reconcile(&self, status: &Status) {
        if let Some((messages, bytes)) = status::pending_counts(status) {
            self.track_pending(messages, bytes);
        }
    }

    fn pending(&self) -> PendingDemand { *self.demand() }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use proptest::prelude::*;
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{
        frame::Headers,
        status::{PENDING_BYTES_HEADER, PENDING_MESSAGES_HEADER, REQUEST_TIMEOUT_CODE},
    };

    #[fixture]
    fn tracker() -> PullDemandTracker { PullDemandTracker::new(HeartbeatMonitor::new()) }

    fn request(batch: usize, max_bytes: u64) -> PullRequest {
        PullRequest::builder(batch)
            .max_bytes(max_bytes)
            .idle_heartbeat(Duration::from_millis(100))
            .build()
            .expect("valid request")
    }

    fn timeout_status(messages: &str, bytes: &str) -> Status {
        Status::new(REQUEST_TIMEOUT_CODE, "Request Timeout").with_headers(
            Headers::new()
                .with(PENDING_MESSAGES_HEADER, messages)
                .with(PENDING_BYTES_HEADER, bytes),
        )
    }

    #[rstest]
    fn pull_adds_demand_and_arms_heartbeat(tracker: PullDemandTracker) {
        tracker.start_pull_request(&request(10, 0));
        tracker.start_pull_request(&request(5, 0));
        let pending = tracker.pending();
        assert_eq!(pending.messages, 15);
        assert!(!pending.tracking_bytes);
        assert!(tracker.monitor.is_armed());
    }

    #[rstest]
    fn pull_without_heartbeat_disarms(tracker: PullDemandTracker) {
        tracker.start_pull_request(&request(10, 0));
        tracker.start_pull_request(&PullRequest::batch(1).expect("valid"));
        assert!(!tracker.monitor.is_armed());
    }

    #[rstest]
    fn consuming_the_batch_closes_the_window(tracker: PullDemandTracker) {
        tracker.start_pull_request(&request(2, 0));
        tracker.track_message(&Message::new("s", "a"));
        assert!(tracker.monitor.is_armed());
        tracker.track_message(&Message::new("s", "b"));
        assert_eq!(tracker.pending(), PendingDemand::default());
        assert!(!tracker.monitor.is_armed());
    }

    #[rstest]
    fn byte_budget_closes_the_window_first(tracker: PullDemandTracker) {
        tracker.start_pull_request(&request(10, 20));
        tracker.track_message(&Message::new("subject", vec![0u8; 5]));
        let pending = tracker.pending();
        assert_eq!(pending.messages, 9);
        assert_eq!(pending.bytes, 8);
        assert!(pending.tracking_bytes);

        tracker.track_message(&Message::new("subject", vec![0u8; 5]));
        assert!(tracker.pending().is_exhausted());
    }

    #[rstest]
    fn bytes_are_ignored_without_budget(tracker: PullDemandTracker) {
        tracker.start_pull_request(&request(3, 0));
        tracker.track_message(&Message::new("subject", vec![0u8; 1_000]));
        assert_eq!(tracker.pending().messages, 2);
        assert_eq!(tracker.pending().bytes, 0);
    }

    #[rstest]
    fn reconcile_uses_authoritative_counts(tracker: PullDemandTracker) {
        tracker.start_pull_request(&request(10, 1_000));
        tracker.reconcile(&timeout_status("4", "100"));
        let pending = tracker.pending();
        assert_eq!(pending.messages, 6);
        assert_eq!(pending.bytes, 900);

        tracker.reconcile(&timeout_status("6", "900"));
        assert!(tracker.pending().is_exhausted());
    }

    #[rstest]
    fn malformed_reconciliation_keeps_estimate(tracker: PullDemandTracker) {
        tracker.start_pull_request(&request(10, 0));
        tracker.reconcile(&timeout_status("lots", "1"));
        tracker.reconcile(&Status::new(REQUEST_TIMEOUT_CODE, "Request Timeout"));
        assert_eq!(tracker.pending().messages, 10);
    }

    #[rstest]
    fn accounting_survives_a_poisoned_lock(tracker: PullDemandTracker) {
        tracker.start_pull_request(&request(10, 0));
        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = tracker.demand();
            panic!("poison the demand lock");
        }));
        assert!(poisoned.is_err());
        assert!(tracker.demand.is_poisoned());

        tracker.track_message(&Message::new("s", "a"));
        assert_eq!(tracker.pending().messages, 9);
    }

    #[rstest]
    fn cancelled_pull_is_withdrawn(tracker: PullDemandTracker) {
        tracker.start_pull_request(&request(10, 0));
        tracker.cancel_pull_request(&request(10, 0));
        assert_eq!(tracker.pending(), PendingDemand::default());
        assert!(!tracker.monitor.is_armed());
    }

    #[rstest]
    fn cancelling_keeps_earlier_demand(tracker: PullDemandTracker) {
        tracker.start_pull_request(&request(4, 0));
        tracker.start_pull_request(&request(10, 500));
        tracker.cancel_pull_request(&request(10, 500));
        let pending = tracker.pending();
        assert_eq!(pending.messages, 4);
        assert_eq!(pending.bytes, 0);
        assert!(!pending.tracking_bytes);
        assert!(tracker.monitor.is_armed());
    }

    #[test]
    fn noop_tracker_never_holds_demand() {
        let tracker = NoopDemandTracker;
        tracker.start_pull_request(&request(10, 10));
        tracker.track_message(&Message::new("s", "a"));
        assert!(tracker.pending().is_exhausted());
    }

    #[rstest]
    #[tokio::test]
    async fn exhausted_wakes_when_window_closes(tracker: PullDemandTracker) {
        let tracker = Arc::new(tracker);
        tracker.start_pull_request(&request(1, 0));
        let waiter = tokio::spawn({
            let tracker = Arc::clone(&tracker);
            async move { tracker.exhausted().await }
        });
        tokio::task::yield_now().await;
        tracker.track_message(&Message::new("s", "a"));
        waiter.await.expect("waiter completes");
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_pulls_and_deliveries_balance(tracker: PullDemandTracker) {
        let tracker = Arc::new(tracker);
        tracker.start_pull_request(&PullRequest::batch(1).expect("valid"));
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let pulls = Arc::clone(&tracker);
            tasks.push(tokio::spawn(async move {
                for _ in 0..250 {
                    pulls.start_pull_request(&PullRequest::batch(1).expect("valid"));
                    tokio::task::yield_now().await;
                }
            }));
            let deliveries = Arc::clone(&tracker);
            tasks.push(tokio::spawn(async move {
                for _ in 0..250 {
                    deliveries.track_message(&Message::new("s", "x"));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.expect("task completes");
        }
        // Deliveries can outrun pulls and clamp at zero, so only the bounds
        // are deterministic.
        assert!(tracker.pending().messages <= 1_001);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Pull(usize, u64),
        Cancel(usize, u64),
        Message(usize),
        Reconcile(u64, u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1usize..50, 0u64..2_000).prop_map(|(b, m)| Op::Pull(b, m)),
            (1usize..50, 0u64..2_000).prop_map(|(b, m)| Op::Cancel(b, m)),
            (0usize..300).prop_map(Op::Message),
            (0u64..60, 0u64..3_000).prop_map(|(m, b)| Op::Reconcile(m, b)),
        ]
    }

    proptest! {
        #[test]
        fn window_closure_resets_everything(ops in proptest::collection::vec(op(), 1..80)) {
            let tracker = PullDemandTracker::new(HeartbeatMonitor::new());
            for op in ops {
                match op {
                    Op::Pull(batch, max_bytes) => {
                        tracker.start_pull_request(&request(batch, max_bytes));
                    }
                    Op::Cancel(batch, max_bytes) => {
                        tracker.cancel_pull_request(&request(batch, max_bytes));
                    }
                    Op::Message(len) => {
                        tracker.track_message(&Message::new("s", vec![0u8; len]));
                    }
                    Op::Reconcile(m, b) => {
                        tracker.reconcile(&timeout_status(&m.to_string(), &b.to_string()));
                    }
                }
                let pending = tracker.pending();
                if pending.messages == 0 {
                    prop_assert_eq!(pending, PendingDemand::default());
                    prop_assert!(!tracker.monitor.is_armed());
                }
                if pending.tracking_bytes {
                    prop_assert!(pending.bytes > 0);
                }
            }
        }
    }
}
