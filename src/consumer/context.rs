//! Factory for consumers bound to one transport.

use std::{fmt, sync::Arc};

use crate::{
    consumer::{FetchConsumer, ManualConsumer, MessageHandler, SimpleConsumer},
    error::ConsumerError,
    frame::Message,
    options::{ConsumeOptions, FetchConsumeOptions},
    subscription::SubscriptionConfig,
    transport::PullTransport,
};

/// Creates consumers that share a transport and a [`SubscriptionConfig`].
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
///
/// use pullwire::{ConsumerContext, loopback::LoopbackBroker};
///
/// # async fn demo() -> Result<(), pullwire::ConsumerError> {
/// let broker = LoopbackBroker::new();
/// broker.publish("orders", "hello");
///
/// let ctx = ConsumerContext::new(broker.clone());
/// let batch = ctx.fetch_messages(10).await?;
/// assert_eq!(batch.len(), 1);
///
/// let consumer = ctx.consume(|message: pullwire::Message| {
///     println!("{}", message.subject());
/// }).await?;
/// consumer.drain(Duration::from_secs(1)).await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConsumerContext {
    transport: Arc<dyn PullTransport>,
    config: SubscriptionConfig,
}

impl fmt::Debug for ConsumerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConsumerContext {
    /// Create a context with the default [`SubscriptionConfig`].
    #[must_use]
    pub fn new(transport: impl PullTransport) -> Self {
        Self::with_config(Arc::new(transport), SubscriptionConfig::default())
    }

    #[must_use]
    pub fn with_config(transport: Arc<dyn PullTransport>, config: SubscriptionConfig) -> Self {
        Self { transport, config }
    }

    #[must_use]
    pub fn config(&self) -> &SubscriptionConfig { &self.config }

    /// Open a consumer driven entirely by the caller's pulls.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Transport`] when the subscription fails.
    pub async fn manual(&self) -> Result<ManualConsumer, ConsumerError> {
        ManualConsumer::open(Arc::clone(&self.transport), &self.config).await
    }

    /// Issue a single bounded pull described by `options`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Config`] for invalid options and
    /// [`ConsumerError::Transport`] when the subscription or pull fails.
    pub async fn fetch(&self, options: &FetchConsumeOptions) -> Result<FetchConsumer, ConsumerError> {
        FetchConsumer::start(Arc::clone(&self.transport), &self.config, options).await
    }

    /// Fetch up to `max_messages` with default timing.
    ///
    /// # Errors
    ///
    /// As [`ConsumerContext::fetch`] and [`FetchConsumer::fetch_batch`].
    pub async fn fetch_messages(&self, max_messages: usize) -> Result<Vec<Message>, ConsumerError> {
        let options = FetchConsumeOptions::builder()
            .max_messages(max_messages)
            .build()?;
        self.fetch(&options).await?.fetch_batch().await
    }

    /// Fetch up to `max_messages` totalling at most `max_bytes`.
    ///
    /// # Errors
    ///
    /// As [`ConsumerContext::fetch_messages`].
    pub async fn fetch_bytes(
        &self,
        max_bytes: u64,
        max_messages: usize,
    ) -> Result<Vec<Message>, ConsumerError> {
        let options = FetchConsumeOptions::builder()
            .max_bytes(max_bytes, max_messages)
            .build()?;
        self.fetch(&options).await?.fetch_batch().await
    }

    /// Start continuous delivery to `handler` with default options.
    ///
    /// # Errors
    ///
    /// As [`ConsumerContext::consume_with`].
    pub async fn consume<H: MessageHandler>(&self, handler: H) -> Result<SimpleConsumer, ConsumerError> {
        self.consume_with(handler, ConsumeOptions::default()).await
    }

    /// Start continuous delivery to `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Config`] when refill requests cannot be
    /// derived from `options` and [`ConsumerError::Transport`] when the
    /// subscription or initial pull fails.
    pub async fn consume_with<H: MessageHandler>(
        &self,
        handler: H,
        options: ConsumeOptions,
    ) -> Result<SimpleConsumer, ConsumerError> {
        SimpleConsumer::start(Arc::clone(&self.transport), &self.config, handler, options).await
    }
}
