//! Handler-driven consumption with refills and drain.

use std::{
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use pullwire::{
    ConsumeOptions,
    ConsumerState,
    Message,
    SimpleConsumer,
    Status,
    loopback::LoopbackBroker,
};
use pullwire_testing::{broker, context, publish_n, recording_context, wait_until};
use rstest::{fixture, rstest};
use tokio::time::{self, Instant};

const SETTLE: Duration = Duration::from_secs(5);

/// Size of a message published by `publish_n` on `orders` with a single
/// digit index and sequence number.
const ORDERS_MESSAGE_SIZE: u64 =
    ("orders".len() + "orders-0".len() + "$JS.ACK.loopback.1".len()) as u64;

/// Counts handled messages.
#[derive(Clone, Default)]
struct Counter(Arc<AtomicUsize>);

impl Counter {
    fn handler(&self) -> impl FnMut(Message) + Send + 'static {
        let count = Arc::clone(&self.0);
        move |_message| {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn get(&self) -> usize { self.0.load(Ordering::SeqCst) }

    async fn reaches(&self, expected: usize) -> bool {
        let count = &self.0;
        wait_until(SETTLE, move || async move {
            count.load(Ordering::SeqCst) >= expected
        })
        .await
    }
}

#[fixture]
fn counter() -> Counter { Counter::default() }

fn batch_options(batch_size: usize) -> ConsumeOptions {
    ConsumeOptions::builder()
        .batch_size(batch_size)
        .build()
        .expect("valid options")
}

async fn pull_sizes(broker: &LoopbackBroker) -> Vec<usize> {
    broker
        .pull_log()
        .await
        .iter()
        .map(pullwire::PullRequest::batch_size)
        .collect()
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn refill_issued_once_threshold_is_crossed(broker: LoopbackBroker, counter: Counter) {
    let consumer = context(&broker)
        .consume_with(counter.handler(), batch_options(10))
        .await
        .expect("consumer");

    publish_n(&broker, "orders", 4);
    assert!(counter.reaches(4).await);
    assert_eq!(pull_sizes(&broker).await, vec![10], "pending 6 is above threshold");

    publish_n(&broker, "orders", 4);
    assert!(counter.reaches(8).await);
    assert_eq!(pull_sizes(&broker).await, vec![10, 5], "one refill at pending 5");
    assert_eq!(consumer.pending().messages, 7);

    consumer.stop().await;
}

async fn pull_limits(broker: &LoopbackBroker) -> Vec<(usize, u64)> {
    broker
        .pull_log()
        .await
        .iter()
        .map(|request| (request.batch_size(), request.max_bytes()))
        .collect()
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn byte_threshold_triggers_refill(broker: LoopbackBroker, counter: Counter) {
    let options = ConsumeOptions::builder()
        .batch_size(100)
        .batch_bytes(10 * ORDERS_MESSAGE_SIZE)
        .build()
        .expect("valid options");
    let consumer = context(&broker)
        .consume_with(counter.handler(), options)
        .await
        .expect("consumer");

    publish_n(&broker, "orders", 4);
    assert!(counter.reaches(4).await);
    assert_eq!(pull_limits(&broker).await, vec![(100, 10 * ORDERS_MESSAGE_SIZE)]);

    publish_n(&broker, "orders", 1);
    assert!(counter.reaches(5).await);
    assert_eq!(
        pull_limits(&broker).await,
        vec![(100, 10 * ORDERS_MESSAGE_SIZE), (50, 5 * ORDERS_MESSAGE_SIZE)],
        "half the byte budget spent while message demand is still high"
    );
    let pending = consumer.pending();
    assert!(pending.tracking_bytes);
    assert_eq!(pending.messages, 145);
    assert_eq!(pending.bytes, 10 * ORDERS_MESSAGE_SIZE);
    consumer.stop().await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn oversized_message_is_reported_once(counter: Counter) {
    let broker = LoopbackBroker::new();
    publish_n(&broker, "orders", 1);
    let (ctx, listener) = recording_context(&broker);
    let options = ConsumeOptions::builder()
        .batch_size(10)
        .batch_bytes(ORDERS_MESSAGE_SIZE / 2)
        .build()
        .expect("valid options");
    let consumer = ctx
        .consume_with(counter.handler(), options)
        .await
        .expect("consumer");

    time::sleep(Duration::from_millis(200)).await;
    assert_eq!(broker.stats().await.pull_requests, 1, "no pull after the refusal");
    assert_eq!(counter.get(), 0);
    let errors: Vec<_> = listener
        .recorded()
        .errors
        .iter()
        .map(|status| (status.code(), status.text().to_owned()))
        .collect();
    assert_eq!(
        errors,
        vec![(409, "Message Size Exceeds MaxBytes".to_owned())]
    );
    assert!(consumer.pending().is_exhausted(), "terminus reconciled demand");
    consumer.stop().await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn backlog_is_consumed_continuously(broker: LoopbackBroker) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let seen = Arc::clone(&seen);
        move |message: Message| {
            seen.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(message.payload().clone());
        }
    };
    publish_n(&broker, "orders", 100);

    let consumer = context(&broker)
        .consume_with(handler, batch_options(10))
        .await
        .expect("consumer");
    let done = wait_until(SETTLE, || {
        let seen = Arc::clone(&seen);
        async move { seen.lock().unwrap_or_else(PoisonError::into_inner).len() >= 100 }
    })
    .await;
    assert!(done, "all messages handled");

    let seen = seen.lock().unwrap_or_else(PoisonError::into_inner).clone();
    let expected: Vec<_> = (0..100).map(|i| format!("orders-{i}")).collect();
    let payloads: Vec<_> = seen
        .iter()
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .collect();
    assert_eq!(payloads, expected, "handled in stream order");
    assert!(consumer.is_active());
    consumer.stop().await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn fatal_status_reaches_listener_without_stopping_delivery(counter: Counter) {
    let broker = LoopbackBroker::new();
    let (ctx, listener) = recording_context(&broker);
    let consumer = ctx
        .consume_with(counter.handler(), batch_options(10))
        .await
        .expect("consumer");

    broker.inject(consumer.inbox(), Status::new(409, "Consumer Deleted"));
    publish_n(&broker, "orders", 3);
    assert!(counter.reaches(3).await);

    let recorded = listener.recorded();
    assert_eq!(recorded.errors, vec![Status::new(409, "Consumer Deleted")]);
    assert!(consumer.is_active());
    consumer.stop().await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn handler_panic_does_not_stop_delivery(broker: LoopbackBroker) {
    let handled = Arc::new(AtomicUsize::new(0));
    let handler = {
        let handled = Arc::clone(&handled);
        move |message: Message| {
            assert_ne!(&message.payload()[..], b"orders-0", "poison message");
            handled.fetch_add(1, Ordering::SeqCst);
        }
    };
    let consumer = context(&broker)
        .consume_with(handler, batch_options(10))
        .await
        .expect("consumer");

    publish_n(&broker, "orders", 3);
    let done = wait_until(SETTLE, || {
        let handled = Arc::clone(&handled);
        async move { handled.load(Ordering::SeqCst) >= 2 }
    })
    .await;
    assert!(done, "messages after the panic are handled");
    assert_eq!(consumer.pending().messages, 7, "the panicking message was accounted");
    consumer.stop().await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn expired_pull_is_reissued_while_active(broker: LoopbackBroker, counter: Counter) {
    let options = ConsumeOptions::builder()
        .batch_size(10)
        .expires_in(Duration::from_secs(1))
        .build()
        .expect("valid options");
    let consumer = context(&broker)
        .consume_with(counter.handler(), options)
        .await
        .expect("consumer");

    time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(pull_sizes(&broker).await, vec![10, 10], "initial request re-issued");
    assert_eq!(consumer.pending().messages, 10);
    consumer.stop().await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn drain_times_out_with_demand_outstanding(broker: LoopbackBroker, counter: Counter) {
    let consumer: SimpleConsumer = context(&broker)
        .consume_with(counter.handler(), batch_options(10))
        .await
        .expect("consumer");

    let start = Instant::now();
    assert!(!consumer.drain(Duration::from_secs(1)).await);
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(consumer.state(), ConsumerState::Closed);

    publish_n(&broker, "orders", 3);
    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(counter.get(), 0, "closed consumer handles nothing");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn drain_completes_when_expiry_reconciles_demand(broker: LoopbackBroker, counter: Counter) {
    let options = ConsumeOptions::builder()
        .batch_size(10)
        .expires_in(Duration::from_secs(1))
        .build()
        .expect("valid options");
    let consumer = context(&broker)
        .consume_with(counter.handler(), options)
        .await
        .expect("consumer");

    let start = Instant::now();
    assert!(consumer.drain(Duration::from_secs(5)).await);
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(pull_sizes(&broker).await, vec![10], "no refill while draining");
    assert_eq!(consumer.state(), ConsumerState::Closed);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn drain_handles_messages_already_requested(broker: LoopbackBroker, counter: Counter) {
    let consumer = context(&broker)
        .consume_with(counter.handler(), batch_options(4))
        .await
        .expect("consumer");
    publish_n(&broker, "orders", 1);
    assert!(counter.reaches(1).await);

    let drain = consumer.drain(Duration::from_secs(5));
    let publish = async {
        time::sleep(Duration::from_millis(10)).await;
        publish_n(&broker, "orders", 10);
    };
    let (drained, ()) = tokio::join!(drain, publish);

    assert!(drained, "remaining demand of 3 was delivered");
    assert_eq!(counter.get(), 4);
    assert_eq!(pull_sizes(&broker).await, vec![4]);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn stop_discards_later_deliveries(broker: LoopbackBroker, counter: Counter) {
    let consumer = context(&broker)
        .consume_with(counter.handler(), batch_options(10))
        .await
        .expect("consumer");
    consumer.stop().await;
    assert_eq!(consumer.state(), ConsumerState::Closed);
    assert!(!consumer.drain(Duration::from_secs(1)).await, "demand never reconciled");

    publish_n(&broker, "orders", 3);
    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(counter.get(), 0);
}
