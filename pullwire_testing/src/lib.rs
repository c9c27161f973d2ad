//! Fixtures and helpers for driving `pullwire` consumers in tests.
//!
//! Consumers are exercised against a [`LoopbackBroker`], so tests can publish
//! messages, inject status frames and inspect the pull requests the broker
//! received.
//!
//! ```rust
//! use pullwire_testing::{broker, publish_n};
//!
//! # async fn example() {
//! let broker = broker();
//! publish_n(&broker, "orders", 4);
//! # }
//! ```
//!
//! [`LoopbackBroker`]: pullwire::loopback::LoopbackBroker

pub mod helpers;
pub mod listener;
pub mod logging;
pub mod macros;
pub mod metrics;

pub use helpers::{broker, context, publish_n, quiet_broker, quiet_context, wait_until};
pub use listener::{RecordingListener, recording_context};
pub use logging::{LoggerHandle, logger};
pub use metrics::{assert_counter_eq, counter_value, debugging_recorder_setup};
