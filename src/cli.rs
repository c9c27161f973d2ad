//! Command line interface for the `pullwire` demo binary.
//!
//! The binary publishes a stream of messages to an in-process broker and
//! consumes them with a handler, reporting throughput as it goes.

use clap::Parser;

/// Command line arguments for the `pullwire` binary.
#[derive(Debug, Parser)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version,
    about = "Consume a loopback stream with a pull-demand handler"
)]
pub struct Cli {
    /// Messages to publish before consuming.
    #[arg(long, default_value_t = 10_000)]
    pub messages: u64,

    /// Payload size of each published message in bytes.
    #[arg(long, default_value_t = 128)]
    pub payload_size: usize,

    /// Messages requested by the initial pull.
    #[arg(long, default_value_t = 500)]
    pub batch_size: usize,

    /// Byte budget of the initial pull; 0 leaves it unbounded.
    #[arg(long, default_value_t = 0)]
    pub batch_bytes: u64,

    /// Percentage of the batch consumed before a refill is issued.
    #[arg(long, default_value_t = 50)]
    pub threshold: u8,

    /// Pull request expiry in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    pub expires_ms: u64,

    /// Grace period for the final drain in milliseconds.
    #[arg(long, default_value_t = 1_000)]
    pub drain_ms: u64,

    /// Report throughput every this many messages.
    #[arg(long, default_value_t = 1_000)]
    pub report_every: u64,

    /// Print Prometheus metrics on exit.
    #[arg(long)]
    pub metrics: bool,
}
