//! Continuous, handler-driven consumption with automatic refills.
//!
//! The consumer issues one full-size pull when it starts. After each message
//! the handler runs to completion on the delivery worker and then a refill
//! check compares outstanding demand with the thresholds computed from the
//! options. Refills are smaller than the initial request so broker-side
//! demand stays bounded while delivery never stalls. A batch that ends
//! because the next message exceeds the byte budget is reported to the
//! listener and not re-requested.

use std::{
    fmt,
    ops::ControlFlow,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::{
    demand::{DemandTracker, PendingDemand},
    error::{ConfigError, ConsumerError, LivenessError, StatusError},
    frame::{Message, Status},
    options::ConsumeOptions,
    pull::PullRequest,
    status,
    subscription::{Dispatch, Subscription, SubscriptionConfig, SubscriptionCore},
    transport::PullTransport,
};

/// User code invoked for every delivered message.
///
/// Closures taking a [`Message`] implement this trait.
pub trait MessageHandler: Send + 'static {
    fn handle(&mut self, message: Message);
}

impl<F> MessageHandler for F
where
    F: FnMut(Message) + Send + 'static,
{
    fn handle(&mut self, message: Message) { self(message); }
}

/// Lifecycle of a [`SimpleConsumer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConsumerState {
    /// Messages are handled and refills issued.
    Active = 0,
    /// Messages already requested are still handled; no refills.
    Draining = 1,
    /// Deliveries are discarded.
    Closed = 2,
}

impl ConsumerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self { Self(AtomicU8::new(ConsumerState::Active as u8)) }

    fn get(&self) -> ConsumerState { ConsumerState::from_u8(self.0.load(Ordering::Acquire)) }

    /// Move from `from` to `to`; fails when the current state differs.
    fn transition(&self, from: ConsumerState, to: ConsumerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn close(&self) { self.0.store(ConsumerState::Closed as u8, Ordering::Release); }
}

/// Requests and thresholds fixed when the consumer starts.
#[derive(Clone, Debug, PartialEq, Eq)]
struct RefillPlan {
    initial: PullRequest,
    refill: PullRequest,
    threshold_messages: u64,
    /// `None` when the batch carries no byte budget.
    threshold_bytes: Option<u64>,
}

impl RefillPlan {
    fn new(options: &ConsumeOptions) -> Result<Self, ConfigError> {
        let batch = options.batch_size() as u64;
        let batch_bytes = options.batch_bytes();
        let percent = u64::from(options.threshold_percent());

        let refill_messages = (batch.saturating_mul(percent) / 100).max(1);
        let refill_bytes = if batch_bytes == 0 {
            0
        } else {
            (batch_bytes.saturating_mul(percent) / 100).max(1)
        };
        let refill = PullRequest::builder(usize::try_from(refill_messages).unwrap_or(usize::MAX))
            .max_bytes(refill_bytes)
            .expires_in(options.expires_in())
            .idle_heartbeat(options.idle_heartbeat())
            .build()?;

        Ok(Self {
            initial: options.initial_request()?,
            refill,
            threshold_messages: batch - refill_messages,
            threshold_bytes: (batch_bytes > 0).then(|| batch_bytes - refill_bytes),
        })
    }

    /// The request to issue for `pending`, if any.
    fn next_request(&self, pending: PendingDemand) -> Option<&PullRequest> {
        if pending.messages == 0 && !pending.tracking_bytes {
            return Some(&self.initial);
        }
        let below_messages = pending.messages <= self.threshold_messages;
        let below_bytes = pending.tracking_bytes
            && self
                .threshold_bytes
                .is_some_and(|threshold| pending.bytes <= threshold);
        (below_messages || below_bytes).then_some(&self.refill)
    }
}

struct HandlerDispatch<H> {
    handler: H,
    state: Arc<StateCell>,
    plan: RefillPlan,
}

/// Issue the next request `plan` calls for while the consumer is active.
async fn refill(state: &StateCell, plan: &RefillPlan, core: &SubscriptionCore) {
    if state.get() != ConsumerState::Active {
        return;
    }
    let Some(request) = plan.next_request(core.tracker().pending()) else {
        return;
    };
    debug!(
        inbox = core.inbox(),
        batch = request.batch_size(),
        max_bytes = request.max_bytes(),
        "refilling demand"
    );
    match core.pull(request).await {
        Ok(()) | Err(ConsumerError::Closed) => {}
        Err(e) => warn!(inbox = core.inbox(), error = %e, "refill failed"),
    }
}

#[async_trait]
impl<H: MessageHandler> Dispatch for HandlerDispatch<H> {
    async fn on_message(&mut self, core: &SubscriptionCore, message: Message) -> ControlFlow<()> {
        if self.state.get() == ConsumerState::Closed {
            return ControlFlow::Break(());
        }
        let handler = &mut self.handler;
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler.handle(message))) {
            let panic_msg = panic
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("<non-string panic>");
            error!(inbox = core.inbox(), panic = %panic_msg, "message handler panicked");
        }
        refill(&self.state, &self.plan, core).await;
        ControlFlow::Continue(())
    }

    async fn on_terminus(&mut self, core: &SubscriptionCore, status: Status) -> ControlFlow<()> {
        if status::is_message_too_large(&status) {
            // The oversized message still heads the stream; a new pull would
            // end the same way.
            core.listener().pull_status_error(core.inbox(), &status);
            return ControlFlow::Continue(());
        }
        debug!(inbox = core.inbox(), code = status.code(), text = status.text(), "batch ended");
        refill(&self.state, &self.plan, core).await;
        ControlFlow::Continue(())
    }

    async fn on_error(&mut self, _core: &SubscriptionCore, _error: StatusError) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    async fn on_liveness(
        &mut self,
        _core: &SubscriptionCore,
        _error: LivenessError,
    ) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

/// Continuous consumer delivering to a [`MessageHandler`].
///
/// Fatal statuses and heartbeat alarms go to the subscription's
/// [`ConsumerListener`](crate::listener::ConsumerListener); the delivery
/// worker keeps running.
pub struct SimpleConsumer {
    subscription: Subscription,
    state: Arc<StateCell>,
    options: ConsumeOptions,
}

impl fmt::Debug for SimpleConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleConsumer")
            .field("inbox", &self.subscription.inbox())
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl SimpleConsumer {
    pub(crate) async fn start<H: MessageHandler>(
        transport: Arc<dyn PullTransport>,
        config: &SubscriptionConfig,
        handler: H,
        options: ConsumeOptions,
    ) -> Result<Self, ConsumerError> {
        let plan = RefillPlan::new(&options)?;
        let initial = plan.initial.clone();
        let state = Arc::new(StateCell::new());
        let dispatch = HandlerDispatch {
            handler,
            state: Arc::clone(&state),
            plan,
        };
        let subscription = Subscription::open(transport, config, dispatch).await?;
        subscription.pull(&initial).await?;
        info!(
            inbox = subscription.inbox(),
            batch = options.batch_size(),
            batch_bytes = options.batch_bytes(),
            threshold_percent = options.threshold_percent(),
            "consumer started"
        );
        Ok(Self {
            subscription,
            state,
            options,
        })
    }

    /// Stop refilling and close once outstanding demand is exhausted or
    /// `grace` elapses, whichever comes first.
    ///
    /// Returns `true` when demand was exhausted within the grace period.
    pub async fn drain(&self, grace: Duration) -> bool {
        if !self
            .state
            .transition(ConsumerState::Active, ConsumerState::Draining)
        {
            return self.pending().is_exhausted();
        }
        info!(inbox = self.subscription.inbox(), ?grace, "consumer draining");
        let exhausted = time::timeout(grace, self.subscription.core().tracker().exhausted())
            .await
            .is_ok();
        if !exhausted {
            debug!(
                inbox = self.subscription.inbox(),
                pending = ?self.pending(),
                "grace period elapsed with demand outstanding"
            );
        }
        self.stop().await;
        exhausted
    }

    /// Close immediately; deliveries still in flight are discarded.
    pub async fn stop(&self) {
        self.state.close();
        self.subscription.unsubscribe().await;
    }

    #[must_use]
    pub fn state(&self) -> ConsumerState { self.state.get() }

    #[must_use]
    pub fn is_active(&self) -> bool { self.state() == ConsumerState::Active }

    #[must_use]
    pub fn pending(&self) -> PendingDemand { self.subscription.pending() }

    #[must_use]
    pub fn inbox(&self) -> &str { self.subscription.inbox() }

    #[must_use]
    pub fn options(&self) -> &ConsumeOptions { &self.options }
}
