//! Demo binary consuming a loopback stream with a handler.
//!
//! Publishes `--messages` messages to an in-process broker, consumes them
//! with continuous pull demand, reports throughput and drains on completion.

mod cli;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use clap::Parser;
use pullwire::{ConsumeOptions, ConsumerContext, Message, loopback::LoopbackBroker};
use tokio::sync::Notify;
use tracing::info;

fn report(label: &str, start: Instant, count: u64) {
    let elapsed = start.elapsed();
    info!(label, count, elapsed_ms = elapsed.as_millis(), "received messages");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();

    #[cfg(feature = "metrics")]
    let exporter = if cli.metrics {
        Some(metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?)
    } else {
        None
    };

    let options = ConsumeOptions::builder()
        .batch_size(cli.batch_size)
        .batch_bytes(cli.batch_bytes)
        .threshold_percent(cli.threshold)
        .expires_in(Duration::from_millis(cli.expires_ms))
        .build()?;

    let broker = LoopbackBroker::new();
    let payload = vec![b'x'; cli.payload_size];
    for i in 0..cli.messages {
        broker.publish(format!("demo.{}", i % 16), payload.clone());
    }
    info!(messages = cli.messages, "stream populated");

    let start = Instant::now();
    let count = Arc::new(AtomicU64::new(0));
    let done = Arc::new(Notify::new());
    let handler = {
        let count = Arc::clone(&count);
        let done = Arc::clone(&done);
        let (target, every) = (cli.messages, cli.report_every.max(1));
        move |_message: Message| {
            let seen = count.fetch_add(1, Ordering::Relaxed) + 1;
            if seen % every == 0 {
                report("handler", start, seen);
            }
            if seen == target {
                done.notify_one();
            }
        }
    };

    let ctx = ConsumerContext::new(broker.clone());
    let consumer = ctx.consume_with(handler, options).await?;
    if cli.messages > 0 {
        done.notified().await;
    }

    info!("start draining");
    let drained = consumer.drain(Duration::from_millis(cli.drain_ms)).await;
    report("final", start, count.load(Ordering::Relaxed));

    let stats = broker.stats().await;
    info!(
        drained,
        pull_requests = stats.pull_requests,
        delivered = stats.delivered,
        "consumer closed"
    );

    #[cfg(feature = "metrics")]
    if let Some(handle) = exporter {
        handle.run_upkeep();
        println!("{}", handle.render());
    }

    Ok(())
}
