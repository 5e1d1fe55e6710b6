use pong_responder::{EchoResponder, ResponderConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = ResponderConfig::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        address = %config.address,
        port = config.port,
        max_chunk_size = config.max_chunk_size,
        backlog = config.backlog,
        runtime = ?config.runtime,
        "Starting pong-responder"
    );

    let responder = EchoResponder::start(config).inspect_err(|e| {
        error!(error = %e, "Failed to start responder");
    })?;

    // Only returns once the listening socket has failed
    responder.run().inspect_err(|e| {
        error!(error = %e, "Responder stopped");
    })?;

    Ok(())
}
