//! Event-driven backends.
//!
//! The blocking backend lives in `responder`. The backends here drive the
//! same reply logic (`protocol::Session`) from an event loop:
//! - `mio`: readiness-based I/O (epoll on Linux, kqueue on macOS)
//! - `tokio`: a current-thread Tokio runtime
//!
//! Both serve one connection at a time, like the blocking backend.

mod mio_loop;
mod tokio_loop;

pub use tokio_loop::handle_connection;

use crate::config::ResponderConfig;
use crate::error::ResponderError;
use std::net::TcpListener;

/// Run with the mio backend.
pub fn run_mio(listener: TcpListener, config: &ResponderConfig) -> Result<(), ResponderError> {
    mio_loop::run(listener, config)
}

/// Run with the Tokio backend.
pub fn run_tokio(listener: TcpListener, config: &ResponderConfig) -> Result<(), ResponderError> {
    tokio_loop::run(listener, config)
}
