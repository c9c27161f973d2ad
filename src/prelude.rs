//! Optional convenience imports for common consumer workflows.
//!
//! Kept to the high-frequency types. Prefer importing specialised APIs
//! directly from their owning modules.
//!
//! # Examples
//!
//! ```rust,no_run
//! use pullwire::prelude::*;
//!
//! async fn first(ctx: &ConsumerContext) -> Result<Option<Message>, ConsumerError> {
//!     Ok(ctx.fetch_messages(1).await?.into_iter().next())
//! }
//! ```

pub use crate::{
    consumer::{ConsumerContext, FetchConsumer, ManualConsumer, MessageHandler, SimpleConsumer},
    error::{ConsumerError, StatusError},
    frame::{Frame, Message, Status},
    listener::ConsumerListener,
    options::{ConsumeOptions, FetchConsumeOptions},
    pull::PullRequest,
    transport::PullTransport,
};
