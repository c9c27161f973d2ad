//! Caller-driven pulls with blocking reads.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, mpsc},
    time,
};

use crate::{
    demand::PendingDemand,
    error::{ConfigError, ConsumerError},
    frame::Message,
    pull::PullRequest,
    subscription::{Delivery, QueueDispatch, Subscription, SubscriptionConfig},
    transport::PullTransport,
};

/// Consumer whose demand is managed entirely by the caller.
///
/// Messages are only delivered in response to [`ManualConsumer::pull`] and
/// friends; nothing is refilled automatically.
///
/// ```rust,no_run
/// # async fn demo(ctx: pullwire::ConsumerContext) -> Result<(), pullwire::ConsumerError> {
/// use std::time::Duration;
///
/// let consumer = ctx.manual().await?;
/// consumer.pull(10).await?;
/// while let Some(message) = consumer.next_message(Duration::from_secs(1)).await? {
///     println!("{}", message.subject());
/// }
/// consumer.unsubscribe().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ManualConsumer {
    subscription: Subscription,
    deliveries: Mutex<mpsc::Receiver<Delivery>>,
}

impl ManualConsumer {
    pub(crate) async fn open(
        transport: Arc<dyn PullTransport>,
        config: &SubscriptionConfig,
    ) -> Result<Self, ConsumerError> {
        let (dispatch, deliveries) = QueueDispatch::channel(config.queue_capacity);
        let subscription = Subscription::open(transport, config, dispatch).await?;
        Ok(Self {
            subscription,
            deliveries: Mutex::new(deliveries),
        })
    }

    /// Issue `request`, adding to outstanding demand.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Closed`] after [`ManualConsumer::unsubscribe`]
    /// and [`ConsumerError::Transport`] when the request cannot be published.
    pub async fn pull_request(&self, request: &PullRequest) -> Result<(), ConsumerError> {
        self.subscription.pull(request).await
    }

    /// Request up to `batch_size` messages, waiting on the broker for them.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for a zero batch, otherwise as
    /// [`ManualConsumer::pull_request`].
    pub async fn pull(&self, batch_size: usize) -> Result<(), ConsumerError> {
        self.pull_request(&PullRequest::batch(batch_size)?).await
    }

    /// Request up to `batch_size` messages that are available right now.
    ///
    /// The broker ends the batch with a terminus when fewer are available.
    ///
    /// # Errors
    ///
    /// As [`ManualConsumer::pull`].
    pub async fn pull_no_wait(&self, batch_size: usize) -> Result<(), ConsumerError> {
        self.pull_request(&PullRequest::no_wait(batch_size)?).await
    }

    /// Request up to `batch_size` messages, expiring after `expires_in`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingTimeout`] for a zero expiry, otherwise
    /// as [`ManualConsumer::pull`].
    pub async fn pull_expires_in(
        &self,
        batch_size: usize,
        expires_in: Duration,
    ) -> Result<(), ConsumerError> {
        if expires_in.is_zero() {
            return Err(ConfigError::MissingTimeout.into());
        }
        let request = PullRequest::builder(batch_size)
            .expires_in(expires_in)
            .build()?;
        self.pull_request(&request).await
    }

    /// Wait up to `timeout` for the next message.
    ///
    /// Returns `Ok(None)` when the current batch ends, when the wait times
    /// out or once the consumer is closed. A zero `timeout` waits without a
    /// client-side deadline; the heartbeat alarm still bounds the wait while
    /// demand with an idle heartbeat is outstanding.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Status`] for a fatal broker status and
    /// [`ConsumerError::Liveness`] when the heartbeat alarm fires.
    pub async fn next_message(&self, timeout: Duration) -> Result<Option<Message>, ConsumerError> {
        let wait = async {
            let mut deliveries = self.deliveries.lock().await;
            deliveries.recv().await
        };
        let delivery = if timeout.is_zero() {
            wait.await
        } else {
            match time::timeout(timeout, wait).await {
                Ok(delivery) => delivery,
                Err(_) => return Ok(None),
            }
        };
        match delivery {
            Some(Delivery::Message(message)) => Ok(Some(message)),
            Some(Delivery::Terminus(_)) | None => Ok(None),
            Some(Delivery::Error(error)) => Err(error.into()),
            Some(Delivery::Liveness(error)) => Err(error.into()),
        }
    }

    /// Close the subscription. Blocked readers return `Ok(None)`.
    pub async fn unsubscribe(&self) { self.subscription.unsubscribe().await; }

    #[must_use]
    pub fn pending(&self) -> PendingDemand { self.subscription.pending() }

    #[must_use]
    pub fn inbox(&self) -> &str { self.subscription.inbox() }

    #[must_use]
    pub fn is_closed(&self) -> bool { self.subscription.is_closed() }
}
