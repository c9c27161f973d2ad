//! Broker and context fixtures.

use std::{future::Future, time::Duration};

use pullwire::{
    ConsumerContext,
    loopback::{LoopbackBroker, LoopbackConfig},
};
use rstest::fixture;
use tokio::time;

/// A broker that emits idle heartbeats. Must be created inside a runtime.
#[fixture]
#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
pub fn broker() -> LoopbackBroker { LoopbackBroker::new() }

/// A broker that never emits heartbeats, for liveness tests.
#[fixture]
pub fn quiet_broker() -> LoopbackBroker {
    LoopbackBroker::with_config(LoopbackConfig {
        heartbeats: false,
        ..LoopbackConfig::default()
    })
}

/// A context bound to `broker`.
pub fn context(broker: &LoopbackBroker) -> ConsumerContext { ConsumerContext::new(broker.clone()) }

/// A broker without heartbeats together with a context bound to it.
pub fn quiet_context() -> (LoopbackBroker, ConsumerContext) {
    let broker = quiet_broker();
    let ctx = context(&broker);
    (broker, ctx)
}

/// Publish `count` messages on `subject`, numbering the payloads from zero.
pub fn publish_n(broker: &LoopbackBroker, subject: &str, count: usize) -> Vec<u64> {
    (0..count)
        .map(|i| broker.publish(subject, format!("{subject}-{i}")))
        .collect()
}

/// Poll `check` every millisecond until it returns `true` or `limit` elapses.
///
/// Returns whether the condition was met.
pub async fn wait_until<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = time::Instant::now() + limit;
    loop {
        if check().await {
            return true;
        }
        if time::Instant::now() >= deadline {
            return false;
        }
        time::sleep(Duration::from_millis(1)).await;
    }
}
