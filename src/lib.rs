#![doc(html_root_url = "https://docs.rs/pullwire/latest")]
//! Client-side flow control for pull-based stream consumers.
//!
//! A pull consumer receives messages only in response to explicit demand.
//! This crate tracks that demand, classifies the frames a broker sends back,
//! watches idle heartbeats for silence, and offers three ways to consume:
//! manual pulls, one-shot fetches and continuous handler-driven delivery with
//! automatic refills.
//!
//! The connection itself lives behind [`transport::PullTransport`]; the
//! [`loopback`] module provides an in-process broker for demos and tests.

pub mod consumer;
pub mod demand;
pub mod error;
pub mod frame;
pub mod heartbeat;
pub mod listener;
pub mod loopback;
pub mod manager;
pub mod metrics;
pub mod options;
pub mod prelude;
pub mod pull;
pub mod status;
mod subscription;
pub mod transport;

pub use consumer::{
    ConsumerContext,
    ConsumerState,
    FetchConsumer,
    ManualConsumer,
    MessageHandler,
    SimpleConsumer,
};
pub use error::{ConfigError, ConsumerError, LivenessError, StatusError, TransportError};
pub use frame::{Frame, Headers, Message, Status};
pub use metrics::{HEARTBEAT_ALARMS, MESSAGES, PULL_REQUESTS, STATUSES};
pub use options::{ConsumeOptions, FetchConsumeOptions};
pub use pull::PullRequest;
pub use subscription::{DEFAULT_QUEUE_CAPACITY, SubscriptionConfig};
