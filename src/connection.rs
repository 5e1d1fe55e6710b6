//! Per-connection bookkeeping shared by every backend.

use crate::error::ResponderError;
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use tracing::{info, warn};

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side (empty read).
    PeerClosed,
    /// A read failed with something other than EOF.
    ReadFailed,
    /// A reply could not be delivered.
    WriteFailed,
}

impl CloseReason {
    fn from_result(result: &Result<(), ResponderError>) -> Self {
        match result {
            Ok(()) => CloseReason::PeerClosed,
            Err(ResponderError::Write { .. }) => CloseReason::WriteFailed,
            Err(_) => CloseReason::ReadFailed,
        }
    }
}

/// What happened on one connection, from accept to close.
#[derive(Debug, Clone)]
pub struct ConnectionSummary {
    pub peer: SocketAddr,
    pub accepted_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub replies: u64,
    pub close: CloseReason,
}

impl ConnectionSummary {
    /// Close out a connection and report it.
    ///
    /// Connection-local errors are logged here, before the backend goes back
    /// to accepting.
    pub fn finish(
        peer: SocketAddr,
        accepted_at: DateTime<Utc>,
        replies: u64,
        result: Result<(), ResponderError>,
    ) -> Self {
        let close = CloseReason::from_result(&result);
        if let Err(e) = &result {
            warn!(peer = %peer, replies, error = %e, "Connection failed, closing");
        }

        let summary = ConnectionSummary {
            peer,
            accepted_at,
            closed_at: Utc::now(),
            replies,
            close,
        };

        info!(
            peer = %peer,
            replies,
            duration_ms = summary.duration().num_milliseconds(),
            close = ?close,
            "Connection closed"
        );

        summary
    }

    pub fn duration(&self) -> chrono::Duration {
        self.closed_at - self.accepted_at
    }
}
