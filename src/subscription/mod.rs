//! Per-subscription delivery machinery shared by every consumer.
//!
//! A [`Subscription`] owns one transport feed. Opening it spawns two tasks:
//! the heartbeat monitor and a delivery worker that classifies each frame and
//! hands the outcome to a [`Dispatch`] implementation chosen by the consumer.
//! Pull issuance goes through [`SubscriptionCore::pull`] so demand is always
//! recorded before the request reaches the transport and withdrawn again when
//! the transport fails to publish it.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::{runtime::Handle, sync::mpsc};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::{
    demand::{DemandTracker, PendingDemand, PullDemandTracker},
    error::{ConsumerError, LivenessError, StatusError},
    frame::{Message, Status},
    heartbeat::HeartbeatMonitor,
    listener::{ConsumerListener, LoggingListener},
    manager::MessageManager,
    metrics,
    pull::PullRequest,
    transport::{Inbound, PullTransport},
};

mod worker;

pub(crate) use worker::{Dispatch, QueueDispatch};

/// Default capacity of the queue between the delivery worker and a
/// synchronous reader.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Settings applied to every subscription a context opens.
#[derive(Clone)]
pub struct SubscriptionConfig {
    /// Deliveries buffered for synchronous readers before the worker waits.
    pub queue_capacity: usize,
    /// Receives warnings, fatal statuses and heartbeat alarms.
    pub listener: Arc<dyn ConsumerListener>,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            listener: Arc::new(LoggingListener),
        }
    }
}

impl fmt::Debug for SubscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionConfig")
            .field("queue_capacity", &self.queue_capacity)
            .finish_non_exhaustive()
    }
}

/// Outcome handed to a synchronous reader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Message(Message),
    Terminus(Status),
    Error(StatusError),
    Liveness(LivenessError),
}

/// State shared between a subscription handle and its delivery worker.
pub(crate) struct SubscriptionCore {
    inbox: String,
    transport: Arc<dyn PullTransport>,
    tracker: Arc<PullDemandTracker>,
    monitor: HeartbeatMonitor,
    listener: Arc<dyn ConsumerListener>,
    shutdown: CancellationToken,
    unsubscribed: AtomicBool,
}

impl SubscriptionCore {
    pub(crate) fn inbox(&self) -> &str { &self.inbox }

    pub(crate) fn tracker(&self) -> &PullDemandTracker { &self.tracker }

    pub(crate) fn listener(&self) -> &dyn ConsumerListener { self.listener.as_ref() }

    pub(crate) fn shutdown(&self) -> &CancellationToken { &self.shutdown }

    pub(crate) fn is_closed(&self) -> bool { self.shutdown.is_cancelled() }

    /// Record `request` against demand, then publish it.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Closed`] once the subscription is closed and
    /// [`ConsumerError::Transport`] when the publish fails.
    pub(crate) async fn pull(&self, request: &PullRequest) -> Result<(), ConsumerError> {
        if self.is_closed() {
            return Err(ConsumerError::Closed);
        }
        self.tracker.start_pull_request(request);
        debug!(
            inbox = %self.inbox,
            batch = request.batch_size(),
            max_bytes = request.max_bytes(),
            no_wait = request.is_no_wait(),
            "publishing pull request"
        );
        if let Err(e) = self.transport.publish_pull(&self.inbox, request).await {
            self.tracker.cancel_pull_request(request);
            warn!(inbox = %self.inbox, error = %e, "pull request not published");
            return Err(e.into());
        }
        metrics::inc_pull_requests();
        Ok(())
    }

    /// Stop delivery and the heartbeat monitor.
    pub(crate) fn close(&self) {
        self.shutdown.cancel();
        self.monitor.shutdown();
    }

    /// True for the first caller only; that caller releases the feed.
    fn claim_unsubscribe(&self) -> bool { !self.unsubscribed.swap(true, Ordering::AcqRel) }
}

impl fmt::Debug for SubscriptionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionCore")
            .field("inbox", &self.inbox)
            .field("pending", &self.tracker.pending())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Handle to an open subscription and its background tasks.
///
/// Dropping the handle closes the subscription.
#[derive(Debug)]
pub(crate) struct Subscription {
    core: Arc<SubscriptionCore>,
    tasks: TaskTracker,
}

impl Subscription {
    /// Subscribe through `transport` and start delivering to `dispatch`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Transport`] when the transport refuses the
    /// subscription.
    pub(crate) async fn open<D: Dispatch>(
        transport: Arc<dyn PullTransport>,
        config: &SubscriptionConfig,
        dispatch: D,
    ) -> Result<Self, ConsumerError> {
        let Inbound { inbox, frames } = transport.subscribe().await?;
        let monitor = HeartbeatMonitor::new();
        let tracker = Arc::new(PullDemandTracker::new(monitor.clone()));
        let manager = MessageManager::new(
            Arc::clone(&tracker) as Arc<dyn DemandTracker>,
            monitor.clone(),
        );
        let core = Arc::new(SubscriptionCore {
            inbox,
            transport,
            tracker,
            monitor: monitor.clone(),
            listener: Arc::clone(&config.listener),
            shutdown: CancellationToken::new(),
            unsubscribed: AtomicBool::new(false),
        });

        let (alarm_tx, alarm_rx) = mpsc::unbounded_channel();
        let tasks = TaskTracker::new();
        tasks.spawn(monitor.run(alarm_tx));
        tasks.spawn(worker::run(
            Arc::clone(&core),
            manager,
            frames,
            alarm_rx,
            dispatch,
        ));
        tasks.close();
        info!(inbox = %core.inbox, "subscription opened");
        Ok(Self { core, tasks })
    }

    pub(crate) fn core(&self) -> &Arc<SubscriptionCore> { &self.core }

    pub(crate) fn inbox(&self) -> &str { self.core.inbox() }

    pub(crate) fn pending(&self) -> PendingDemand { self.core.tracker.pending() }

    pub(crate) fn is_closed(&self) -> bool { self.core.is_closed() }

    pub(crate) async fn pull(&self, request: &PullRequest) -> Result<(), ConsumerError> {
        self.core.pull(request).await
    }

    /// Close the feed and wait for the background tasks to finish.
    ///
    /// Idempotent.
    pub(crate) async fn unsubscribe(&self) {
        self.core.close();
        if self.core.claim_unsubscribe() {
            self.core.transport.unsubscribe(&self.core.inbox).await;
            info!(inbox = %self.core.inbox, "subscription closed");
        }
        self.tasks.wait().await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.core.close();
        if !self.core.claim_unsubscribe() {
            return;
        }
        if let Ok(handle) = Handle::try_current() {
            let core = Arc::clone(&self.core);
            handle.spawn(async move {
                core.transport.unsubscribe(&core.inbox).await;
                debug!(inbox = %core.inbox, "subscription dropped");
            });
        }
    }
}
