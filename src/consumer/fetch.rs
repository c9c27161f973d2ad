//! One-shot bounded batches.

use std::sync::Arc;

use futures::{Stream, stream};
use tokio::{
    sync::mpsc,
    time::{self, Instant},
};
use tracing::debug;

use crate::{
    demand::PendingDemand,
    error::ConsumerError,
    frame::Message,
    options::FetchConsumeOptions,
    subscription::{Delivery, QueueDispatch, Subscription, SubscriptionConfig},
    transport::PullTransport,
};

/// A single pull request and the messages it yields.
///
/// The batch ends when `max_messages` or `max_bytes` is reached, when the
/// broker signals the end of the batch, or when the expiry elapses. Ending
/// is never an error and no second request is issued.
#[derive(Debug)]
pub struct FetchConsumer {
    subscription: Subscription,
    deliveries: mpsc::Receiver<Delivery>,
    deadline: Instant,
    max_messages: usize,
    max_bytes: u64,
    received_messages: usize,
    received_bytes: u64,
    finished: bool,
}

impl FetchConsumer {
    pub(crate) async fn start(
        transport: Arc<dyn PullTransport>,
        config: &SubscriptionConfig,
        options: &FetchConsumeOptions,
    ) -> Result<Self, ConsumerError> {
        let request = options.request()?;
        let (dispatch, deliveries) = QueueDispatch::channel(config.queue_capacity);
        let subscription = Subscription::open(transport, config, dispatch).await?;
        let deadline = Instant::now() + options.expires_in();
        subscription.pull(&request).await?;
        Ok(Self {
            subscription,
            deliveries,
            deadline,
            max_messages: options.max_messages(),
            max_bytes: options.max_bytes(),
            received_messages: 0,
            received_bytes: 0,
            finished: false,
        })
    }

    fn limits_reached(&self) -> bool {
        self.received_messages >= self.max_messages
            || (self.max_bytes > 0 && self.received_bytes >= self.max_bytes)
    }

    async fn finish(&mut self, reason: &'static str) {
        if self.finished {
            return;
        }
        self.finished = true;
        debug!(
            inbox = self.subscription.inbox(),
            reason,
            messages = self.received_messages,
            bytes = self.received_bytes,
            "fetch finished"
        );
        self.subscription.unsubscribe().await;
    }

    /// Wait for the next message of the batch.
    ///
    /// Returns `Ok(None)` once the batch has ended.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Status`] for a fatal broker status and
    /// [`ConsumerError::Liveness`] when the heartbeat alarm fires. The batch
    /// is finished either way.
    pub async fn next_message(&mut self) -> Result<Option<Message>, ConsumerError> {
        if self.finished {
            return Ok(None);
        }
        if self.limits_reached() {
            self.finish("limit reached").await;
            return Ok(None);
        }
        let delivery = match time::timeout_at(self.deadline, self.deliveries.recv()).await {
            Ok(delivery) => delivery,
            Err(_) => {
                self.finish("expired").await;
                return Ok(None);
            }
        };
        match delivery {
            Some(Delivery::Message(message)) => {
                self.received_messages += 1;
                self.received_bytes = self
                    .received_bytes
                    .saturating_add(message.estimated_size() as u64);
                Ok(Some(message))
            }
            Some(Delivery::Terminus(_)) => {
                self.finish("terminus").await;
                Ok(None)
            }
            None => {
                self.finish("closed").await;
                Ok(None)
            }
            Some(Delivery::Error(error)) => {
                self.finish("status error").await;
                Err(error.into())
            }
            Some(Delivery::Liveness(error)) => {
                self.finish("heartbeat alarm").await;
                Err(error.into())
            }
        }
    }

    /// Collect the remainder of the batch.
    ///
    /// # Errors
    ///
    /// As [`FetchConsumer::next_message`].
    pub async fn fetch_batch(mut self) -> Result<Vec<Message>, ConsumerError> {
        let mut batch = Vec::new();
        while let Some(message) = self.next_message().await? {
            batch.push(message);
        }
        Ok(batch)
    }

    /// Yield the remainder of the batch as a stream.
    ///
    /// An error is yielded once and ends the stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<Message, ConsumerError>> + Send {
        stream::unfold(self, |mut fetch| async move {
            match fetch.next_message().await {
                Ok(Some(message)) => Some((Ok(message), fetch)),
                Ok(None) => None,
                Err(error) => Some((Err(error), fetch)),
            }
        })
    }

    /// True once the batch has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool { self.finished }

    #[must_use]
    pub fn pending(&self) -> PendingDemand { self.subscription.pending() }

    #[must_use]
    pub fn inbox(&self) -> &str { self.subscription.inbox() }

    #[must_use]
    pub fn received(&self) -> (usize, u64) { (self.received_messages, self.received_bytes) }
}
