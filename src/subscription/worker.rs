//! Delivery worker reading one subscription's frame feed.

use std::{ops::ControlFlow, sync::Arc};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Delivery, SubscriptionCore};
use crate::{
    error::{LivenessError, StatusError},
    frame::{Frame, Message, Status},
    manager::{Managed, MessageManager},
    metrics,
};

/// Consumer-specific handling of classified frames.
///
/// Each method runs on the delivery worker, one frame at a time and in
/// arrival order. Returning [`ControlFlow::Break`] stops the worker.
#[async_trait]
pub(crate) trait Dispatch: Send + 'static {
    async fn on_message(&mut self, core: &SubscriptionCore, message: Message) -> ControlFlow<()>;

    async fn on_terminus(&mut self, core: &SubscriptionCore, status: Status) -> ControlFlow<()>;

    async fn on_error(&mut self, core: &SubscriptionCore, error: StatusError) -> ControlFlow<()>;

    async fn on_liveness(
        &mut self,
        core: &SubscriptionCore,
        error: LivenessError,
    ) -> ControlFlow<()>;
}

/// Forwards every outcome to a bounded queue read by a synchronous caller.
#[derive(Debug)]
pub(crate) struct QueueDispatch {
    tx: mpsc::Sender<Delivery>,
}

impl QueueDispatch {
    /// Create the dispatch and the receiving end of its queue.
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    async fn deliver(&self, core: &SubscriptionCore, delivery: Delivery) -> ControlFlow<()> {
        tokio::select! {
            biased;

            () = core.shutdown().cancelled() => ControlFlow::Break(()),
            sent = self.tx.send(delivery) => match sent {
                Ok(()) => ControlFlow::Continue(()),
                Err(_) => {
                    debug!(inbox = core.inbox(), "delivery queue closed");
                    ControlFlow::Break(())
                }
            },
        }
    }
}

#[async_trait]
impl Dispatch for QueueDispatch {
    async fn on_message(&mut self, core: &SubscriptionCore, message: Message) -> ControlFlow<()> {
        self.deliver(core, Delivery::Message(message)).await
    }

    async fn on_terminus(&mut self, core: &SubscriptionCore, status: Status) -> ControlFlow<()> {
        self.deliver(core, Delivery::Terminus(status)).await
    }

    async fn on_error(&mut self, core: &SubscriptionCore, error: StatusError) -> ControlFlow<()> {
        self.deliver(core, Delivery::Error(error)).await
    }

    async fn on_liveness(
        &mut self,
        core: &SubscriptionCore,
        error: LivenessError,
    ) -> ControlFlow<()> {
        self.deliver(core, Delivery::Liveness(error)).await
    }
}

/// Classify frames and alarms until the subscription closes.
pub(super) async fn run<D: Dispatch>(
    core: Arc<SubscriptionCore>,
    manager: MessageManager,
    mut frames: mpsc::Receiver<Frame>,
    mut alarms: mpsc::UnboundedReceiver<LivenessError>,
    mut dispatch: D,
) {
    loop {
        let flow = tokio::select! {
            biased;

            () = core.shutdown().cancelled() => break,

            frame = frames.recv() => match frame {
                Some(frame) => handle_frame(&core, &manager, &mut dispatch, frame).await,
                None => {
                    debug!(inbox = core.inbox(), "frame feed ended");
                    break;
                }
            },

            Some(alarm) = alarms.recv() => {
                metrics::inc_heartbeat_alarms();
                core.listener().heartbeat_alarm(core.inbox(), &alarm);
                dispatch.on_liveness(&core, alarm).await
            }
        };
        if flow.is_break() {
            break;
        }
    }
    core.close();
    debug!(inbox = core.inbox(), "delivery worker stopped");
}

async fn handle_frame<D: Dispatch>(
    core: &SubscriptionCore,
    manager: &MessageManager,
    dispatch: &mut D,
    frame: Frame,
) -> ControlFlow<()> {
    match manager.manage(frame) {
        Managed::Message(message) => dispatch.on_message(core, message).await,
        Managed::Heartbeat => ControlFlow::Continue(()),
        Managed::Terminus(status) => dispatch.on_terminus(core, status).await,
        Managed::Warning(status) => {
            core.listener().pull_status_warning(core.inbox(), &status);
            ControlFlow::Continue(())
        }
        Managed::Error(status) => {
            warn!(
                inbox = core.inbox(),
                code = status.code(),
                "fatal pull status; further pulls are futile"
            );
            core.listener().pull_status_error(core.inbox(), &status);
            dispatch.on_error(core, StatusError::from(&status)).await
        }
    }
}
