//! Boundary to the connection that carries frames and pull requests.
//!
//! Connection lifecycle, reconnects and subject routing live behind
//! [`PullTransport`]. A consumer only needs a per-subscription frame feed and
//! a way to publish pull requests addressed to that feed.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{error::TransportError, frame::Frame, pull::PullRequest};

/// A freshly opened subscription feed.
#[derive(Debug)]
pub struct Inbound {
    /// Reply subject identifying the subscription to the broker.
    pub inbox: String,
    /// Ordered frames delivered to the subscription.
    pub frames: mpsc::Receiver<Frame>,
}

/// Connection operations needed by pull consumers.
///
/// Implementations must deliver frames for an inbox in arrival order and must
/// not block `publish_pull` on the consumer draining its feed.
#[async_trait]
pub trait PullTransport: Send + Sync + 'static {
    /// Open a subscription feed for a consumer.
    async fn subscribe(&self) -> Result<Inbound, TransportError>;

    /// Publish a pull request whose deliveries go to `inbox`.
    async fn publish_pull(&self, inbox: &str, request: &PullRequest) -> Result<(), TransportError>;

    /// Close the feed for `inbox`.
    async fn unsubscribe(&self, inbox: &str);
}
