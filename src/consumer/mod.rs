//! Consumption disciplines built on a subscription.
//!
//! - [`ManualConsumer`]: the caller issues pulls and reads messages one at a
//!   time.
//! - [`FetchConsumer`]: one bounded batch from a single pull request.
//! - [`SimpleConsumer`]: continuous delivery to a handler with automatic
//!   refills and a graceful drain.
//!
//! All three are created through a [`ConsumerContext`].

mod context;
mod fetch;
mod manual;
mod simple;

pub use context::ConsumerContext;
pub use fetch::FetchConsumer;
pub use manual::ManualConsumer;
pub use simple::{ConsumerState, MessageHandler, SimpleConsumer};
