//! Tokio backend.
//!
//! A current-thread runtime whose accept loop awaits each connection handler
//! inline. Nothing is spawned, so the next `accept` is only polled after the
//! current connection has closed.

use crate::config::ResponderConfig;
use crate::connection::ConnectionSummary;
use crate::error::{is_transient_accept_error, ResponderError};
use crate::protocol::Session;
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, trace};

/// Run the Tokio-based responder on the current thread.
pub fn run(listener: std::net::TcpListener, config: &ResponderConfig) -> Result<(), ResponderError> {
    listener
        .set_nonblocking(true)
        .map_err(ResponderError::Accept)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .map_err(ResponderError::Accept)?;

    info!("Using tokio runtime (current thread)");
    runtime.block_on(accept_loop(listener, config.max_chunk_size))
}

async fn accept_loop(
    listener: std::net::TcpListener,
    max_chunk_size: usize,
) -> Result<(), ResponderError> {
    let listener = TcpListener::from_std(listener).map_err(ResponderError::Accept)?;

    loop {
        let (mut stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) if is_transient_accept_error(&e) => {
                debug!(error = %e, "Transient accept failure, retrying");
                continue;
            }
            Err(e) => return Err(ResponderError::Accept(e)),
        };
        let accepted_at = Utc::now();
        debug!(peer = %peer, "Accepted connection");

        let mut session = Session::new();
        let result = handle_connection(&mut stream, max_chunk_size, &mut session).await;
        drop(stream);

        ConnectionSummary::finish(peer, accepted_at, session.replies(), result);
    }
}

/// Answer every chunk on `stream` until the peer closes it.
pub async fn handle_connection<S>(
    stream: &mut S,
    max_chunk_size: usize,
    session: &mut Session,
) -> Result<(), ResponderError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut chunk = vec![0u8; max_chunk_size];

    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ResponderError::Read(e)),
        };
        if !session.on_chunk(n) {
            trace!("Peer closed connection");
            return Ok(());
        }
        trace!(bytes = n, "Received chunk");

        while session.has_pending() {
            let total = session.reply_len();
            let written = total - session.pending().len();
            match stream.write(session.pending()).await {
                Ok(0) => {
                    return Err(ResponderError::Write {
                        written,
                        total,
                        source: std::io::Error::new(
                            std::io::ErrorKind::WriteZero,
                            "write returned 0",
                        ),
                    });
                }
                Ok(n) => {
                    if session.consume(n) {
                        trace!(reply = session.replies() - 1, "Sent reply");
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(ResponderError::Write {
                        written,
                        total,
                        source,
                    })
                }
            }
        }
    }
}
