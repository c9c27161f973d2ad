//! In-process broker implementing [`PullTransport`].
//!
//! [`LoopbackBroker`] keeps one durable stream with a single consumer cursor
//! shared by every subscription, and answers pull requests the way a real
//! broker does: batches are honoured in arrival order, byte budgets end a
//! batch, expiry and no-wait pulls end with a terminus carrying the unfulfilled
//! counts, and idle heartbeats are emitted while a pull waits.
//!
//! The broker runs as its own task fed by an unbounded command channel so a
//! consumer publishing a pull never waits on its own frame feed.

mod broker;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::{
    error::TransportError,
    frame::{Frame, Headers, Message, Status},
    pull::PullRequest,
    status::{HEARTBEAT_CODE, IDLE_HEARTBEAT_TEXT},
    transport::{Inbound, PullTransport},
};

/// Default capacity of each subscription's frame feed.
pub const DEFAULT_FRAME_CAPACITY: usize = 1024;

/// Limits and behaviour of a [`LoopbackBroker`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopbackConfig {
    /// Pull requests that may wait at once; further pulls are refused.
    pub max_waiting: Option<usize>,
    /// Largest accepted batch size.
    pub max_batch: Option<usize>,
    /// Largest accepted byte budget.
    pub max_bytes: Option<u64>,
    /// Longest accepted expiry.
    pub max_expires: Option<Duration>,
    /// Emit idle heartbeats while pulls wait.
    pub heartbeats: bool,
    /// Capacity of each subscription's frame feed.
    pub frame_capacity: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            max_waiting: None,
            max_batch: None,
            max_bytes: None,
            max_expires: None,
            heartbeats: true,
            frame_capacity: DEFAULT_FRAME_CAPACITY,
        }
    }
}

/// Counters reported by [`LoopbackBroker::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Messages appended to the stream.
    pub published: u64,
    /// Messages delivered to subscriptions.
    pub delivered: u64,
    /// Pull requests received, including refused ones.
    pub pull_requests: u64,
    /// Pull requests currently waiting.
    pub waiting: usize,
}

#[derive(Debug)]
enum Command {
    Publish(Message),
    Register {
        inbox: String,
        feed: mpsc::Sender<Frame>,
    },
    Pull {
        inbox: String,
        body: Bytes,
    },
    Unsubscribe {
        inbox: String,
    },
    Inject {
        inbox: String,
        frame: Frame,
    },
    Stats(oneshot::Sender<BrokerStats>),
    PullLog(oneshot::Sender<Vec<PullRequest>>),
}

/// Handle to an in-process broker. Clones share the same broker.
///
/// # Panics
///
/// Constructors spawn the broker task and so must run inside a Tokio
/// runtime.
#[derive(Clone, Debug)]
pub struct LoopbackBroker {
    commands: mpsc::UnboundedSender<Command>,
    config: Arc<LoopbackConfig>,
    next_inbox: Arc<AtomicU64>,
    next_sequence: Arc<AtomicU64>,
}

impl LoopbackBroker {
    #[must_use]
    pub fn new() -> Self { Self::with_config(LoopbackConfig::default()) }

    #[must_use]
    pub fn with_config(config: LoopbackConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(broker::run(config.clone(), rx));
        Self {
            commands,
            config: Arc::new(config),
            next_inbox: Arc::new(AtomicU64::new(1)),
            next_sequence: Arc::new(AtomicU64::new(1)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &LoopbackConfig { &self.config }

    fn send(&self, command: Command) -> bool {
        let sent = self.commands.send(command).is_ok();
        if !sent {
            debug!("loopback broker stopped; command dropped");
        }
        sent
    }

    /// Append a message to the stream, returning its sequence number.
    pub fn publish(&self, subject: impl Into<String>, payload: impl Into<Bytes>) -> u64 {
        self.publish_message(Message::new(subject, payload))
    }

    /// Append a message carrying `headers`.
    pub fn publish_with_headers(
        &self,
        subject: impl Into<String>,
        headers: Headers,
        payload: impl Into<Bytes>,
    ) -> u64 {
        self.publish_message(Message::new(subject, payload).with_headers(headers))
    }

    /// Append `message`; its reply subject is replaced by the broker's
    /// acknowledgement subject.
    pub fn publish_message(&self, message: Message) -> u64 {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let message = message.with_reply_to(format!("$JS.ACK.loopback.{sequence}"));
        self.send(Command::Publish(message));
        sequence
    }

    /// Deliver `frame` to `inbox` ahead of anything the broker sends later.
    pub fn inject(&self, inbox: &str, frame: impl Into<Frame>) {
        self.send(Command::Inject {
            inbox: inbox.to_owned(),
            frame: frame.into(),
        });
    }

    /// Send one idle heartbeat to `inbox`.
    pub fn heartbeat(&self, inbox: &str) {
        self.inject(inbox, Status::new(HEARTBEAT_CODE, IDLE_HEARTBEAT_TEXT));
    }

    /// Current broker counters.
    ///
    /// Returns defaults once the broker has stopped.
    pub async fn stats(&self) -> BrokerStats {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::Stats(tx)) {
            return BrokerStats::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Every pull request received so far, in arrival order.
    pub async fn pull_log(&self) -> Vec<PullRequest> {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::PullLog(tx)) {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

impl Default for LoopbackBroker {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl PullTransport for LoopbackBroker {
    async fn subscribe(&self) -> Result<Inbound, TransportError> {
        let inbox = format!(
            "_INBOX.loopback.{}",
            self.next_inbox.fetch_add(1, Ordering::Relaxed)
        );
        let (feed, frames) = mpsc::channel(self.config.frame_capacity.max(1));
        if !self.send(Command::Register {
            inbox: inbox.clone(),
            feed,
        }) {
            return Err(TransportError::Closed);
        }
        Ok(Inbound { inbox, frames })
    }

    async fn publish_pull(&self, inbox: &str, request: &PullRequest) -> Result<(), TransportError> {
        let body = request.to_json().map_err(TransportError::Encode)?;
        trace!(inbox, bytes = body.len(), "pull request encoded");
        let sent = self.send(Command::Pull {
            inbox: inbox.to_owned(),
            body: body.into(),
        });
        if sent { Ok(()) } else { Err(TransportError::Closed) }
    }

    async fn unsubscribe(&self, inbox: &str) {
        self.send(Command::Unsubscribe {
            inbox: inbox.to_owned(),
        });
    }
}
