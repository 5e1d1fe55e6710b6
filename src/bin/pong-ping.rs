//! Sends a series of pings to a running responder and logs the replies.

use clap::Parser;
use pong_responder::client::{PingClient, DEFAULT_PAYLOAD_SIZE};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pong-ping")]
#[command(version = "0.1.0")]
#[command(about = "Ping a pong-responder and print its replies", long_about = None)]
struct Args {
    /// Responder address
    #[arg(short, long, default_value = "127.0.0.1:5005")]
    server: String,

    /// Number of pings to send
    #[arg(short = 'n', long, default_value_t = 10)]
    count: u64,

    /// Pause between pings in milliseconds
    #[arg(short, long, default_value_t = 1000)]
    interval_ms: u64,

    /// Size of each ping payload in bytes
    #[arg(long, default_value_t = DEFAULT_PAYLOAD_SIZE)]
    payload_size: usize,

    /// Seconds to wait for each reply (0 waits forever)
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut client = PingClient::connect(args.server.as_str(), args.payload_size)?;
    let timeout = (args.timeout > 0).then(|| Duration::from_secs(args.timeout));
    client.set_timeout(timeout)?;

    match client.run(args.count, Duration::from_millis(args.interval_ms)) {
        Ok(replies) => {
            info!(server = %args.server, pings = replies.len(), "Ping finished");
            Ok(())
        }
        Err(e) => {
            error!(server = %args.server, error = %e, "Ping failed");
            Err(e.into())
        }
    }
}
