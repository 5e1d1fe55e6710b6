//! Responder errors.
//!
//! `Bind` and `Accept` are fatal to the process. `Read` and `Write` only end
//! the connection they happened on.

use std::io;

#[derive(Debug)]
pub enum ResponderError {
    /// The listening socket could not be created, resolved or bound.
    Bind { addr: String, source: io::Error },
    /// The listening socket failed while waiting for connections.
    Accept(io::Error),
    /// Non-EOF read failure on a connection.
    Read(io::Error),
    /// A reply could not be fully delivered.
    Write {
        written: usize,
        total: usize,
        source: io::Error,
    },
}

impl ResponderError {
    /// Whether the error ends the process rather than a single connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ResponderError::Bind { .. } | ResponderError::Accept(_))
    }
}

impl std::fmt::Display for ResponderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponderError::Bind { addr, source } => {
                write!(f, "Failed to bind '{}': {}", addr, source)
            }
            ResponderError::Accept(e) => write!(f, "Failed to accept connection: {}", e),
            ResponderError::Read(e) => write!(f, "Failed to read from connection: {}", e),
            ResponderError::Write {
                written,
                total,
                source,
            } => write!(
                f,
                "Failed to write reply ({} of {} bytes sent): {}",
                written, total, source
            ),
        }
    }
}

impl std::error::Error for ResponderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResponderError::Bind { source, .. } | ResponderError::Write { source, .. } => {
                Some(source)
            }
            ResponderError::Accept(e) | ResponderError::Read(e) => Some(e),
        }
    }
}

/// Accept failures caused by a single peer rather than the listening socket.
pub(crate) fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}
