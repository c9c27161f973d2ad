//! One-shot fetches against the loopback broker.

use std::time::Duration;

use futures::StreamExt;
use pullwire::{FetchConsumeOptions, Status, loopback::LoopbackBroker};
use pullwire_testing::{broker, context, end_expect, next_expect, publish_n, quiet_broker};
use rstest::rstest;
use tokio::time::Instant;

/// Size of a message published by `publish_n` on `orders` with a single
/// digit index and sequence number.
const ORDERS_MESSAGE_SIZE: u64 =
    ("orders".len() + "orders-0".len() + "$JS.ACK.loopback.1".len()) as u64;

#[rstest]
#[tokio::test(start_paused = true)]
async fn short_stream_ends_at_expiry(broker: LoopbackBroker) {
    publish_n(&broker, "orders", 5);

    let start = Instant::now();
    let batch = context(&broker).fetch_messages(10).await.expect("fetch");
    assert_eq!(batch.len(), 5);
    assert!(start.elapsed() >= Duration::from_secs(30), "waited for expiry");
    assert_eq!(broker.pull_log().await.len(), 1, "no second request");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn full_batch_returns_without_waiting(broker: LoopbackBroker) {
    publish_n(&broker, "orders", 20);

    let start = Instant::now();
    let batch = context(&broker).fetch_messages(10).await.expect("fetch");
    assert_eq!(batch.len(), 10);
    assert!(start.elapsed() < Duration::from_secs(1));
    let payloads: Vec<_> = batch.iter().map(|m| m.payload().clone()).collect();
    assert_eq!(payloads.first().map(|p| &p[..]), Some(&b"orders-0"[..]));
    assert_eq!(payloads.last().map(|p| &p[..]), Some(&b"orders-9"[..]));

    let stats = broker.stats().await;
    assert_eq!(stats.delivered, 10);
    assert_eq!(stats.pull_requests, 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn byte_budget_bounds_the_batch(broker: LoopbackBroker) {
    publish_n(&broker, "orders", 5);

    let batch = context(&broker)
        .fetch_bytes(2 * ORDERS_MESSAGE_SIZE, 10)
        .await
        .expect("fetch");
    assert_eq!(batch.len(), 2);
    let request = broker.pull_log().await.remove(0);
    assert_eq!(request.max_bytes(), 2 * ORDERS_MESSAGE_SIZE);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn fetch_streams_messages_in_order(broker: LoopbackBroker) {
    let sequences = publish_n(&broker, "orders", 3);
    let options = FetchConsumeOptions::builder()
        .max_messages(3)
        .build()
        .expect("valid options");

    let fetch = context(&broker).fetch(&options).await.expect("fetch");
    let messages: Vec<_> = fetch
        .into_stream()
        .map(|m| m.expect("message"))
        .collect()
        .await;
    let replies: Vec<_> = messages
        .iter()
        .map(|m| m.reply_to().map(str::to_owned))
        .collect();
    let expected: Vec<_> = sequences
        .iter()
        .map(|seq| Some(format!("$JS.ACK.loopback.{seq}")))
        .collect();
    assert_eq!(replies, expected);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn empty_stream_yields_empty_batch(broker: LoopbackBroker) {
    let options = FetchConsumeOptions::builder()
        .max_messages(10)
        .expires_in(Duration::from_secs(1))
        .build()
        .expect("valid options");

    let start = Instant::now();
    let mut fetch = context(&broker).fetch(&options).await.expect("fetch");
    end_expect!(fetch.next_message());
    assert!(start.elapsed() < Duration::from_millis(1100));
    assert!(fetch.is_finished());
    assert_eq!(fetch.received(), (0, 0));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn fatal_status_ends_fetch_with_error(broker: LoopbackBroker) {
    publish_n(&broker, "orders", 1);
    let options = FetchConsumeOptions::builder()
        .max_messages(5)
        .build()
        .expect("valid options");

    let mut fetch = context(&broker).fetch(&options).await.expect("fetch");
    next_expect!(fetch.next_message());
    broker.inject(fetch.inbox(), Status::new(409, "Consumer Deleted"));

    let err = fetch.next_message().await.expect_err("fatal status");
    assert_eq!(err.as_status().map(|s| s.code), Some(409));
    assert!(fetch.is_finished());
    end_expect!(fetch.next_message());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn silent_feed_ends_fetch_with_liveness_error(quiet_broker: LoopbackBroker) {
    let options = FetchConsumeOptions::builder()
        .max_messages(5)
        .expires_in(Duration::from_secs(30))
        .idle_heartbeat(Duration::from_secs(1))
        .build()
        .expect("valid options");

    let start = Instant::now();
    let mut fetch = context(&quiet_broker).fetch(&options).await.expect("fetch");
    let err = fetch.next_message().await.expect_err("liveness");
    assert!(err.is_liveness());
    assert!(start.elapsed() < Duration::from_secs(30));
    assert!(fetch.is_finished());
}
