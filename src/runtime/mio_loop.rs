//! mio event loop backend.
//!
//! Readiness-based model: poll tells us when sockets are ready, then we
//! perform non-blocking read/write syscalls. Uses epoll on Linux, kqueue on
//! macOS.
//!
//! Only one connection is ever registered. While it is open the listener is
//! deregistered, so new connections wait in the kernel backlog until the
//! current one closes.

use crate::config::ResponderConfig;
use crate::connection::ConnectionSummary;
use crate::error::{is_transient_accept_error, ResponderError};
use crate::protocol::Session;
use chrono::{DateTime, Utc};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use tracing::{debug, info, trace, warn};

const LISTENER_TOKEN: Token = Token(0);
const CONNECTION_TOKEN: Token = Token(1);

/// The connection being served.
struct ActiveConnection {
    stream: TcpStream,
    peer: SocketAddr,
    accepted_at: DateTime<Utc>,
    session: Session,
    /// Registered for WRITABLE while a reply is stuck in the socket buffer.
    awaiting_writable: bool,
}

enum Progress {
    Open,
    Closed,
}

struct EventLoop {
    poll: Poll,
    listener: TcpListener,
    listening: bool,
    active: Option<ActiveConnection>,
    chunk: Vec<u8>,
}

/// Run the mio-based responder on the current thread.
pub fn run(listener: std::net::TcpListener, config: &ResponderConfig) -> Result<(), ResponderError> {
    listener
        .set_nonblocking(true)
        .map_err(ResponderError::Accept)?;

    let mut event_loop = EventLoop {
        poll: Poll::new().map_err(ResponderError::Accept)?,
        listener: TcpListener::from_std(listener),
        listening: false,
        active: None,
        chunk: vec![0u8; config.max_chunk_size],
    };

    info!("Using mio runtime (epoll/kqueue)");
    event_loop.serve_pending()?;
    event_loop.run()
}

impl EventLoop {
    fn run(&mut self) -> Result<(), ResponderError> {
        let mut events = Events::with_capacity(16);

        loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ResponderError::Accept(e));
            }

            for event in events.iter() {
                match event.token() {
                    // pending connections are picked up by serve_pending below
                    LISTENER_TOKEN => {}
                    CONNECTION_TOKEN => self.drive_active(),
                    Token(_) => {}
                }
            }

            if self.active.is_none() {
                self.serve_pending()?;
            }
        }
    }

    /// Accept queued connections one after another until one stays open or
    /// the backlog is empty, then listen only if nothing is being served.
    fn serve_pending(&mut self) -> Result<(), ResponderError> {
        while self.active.is_none() {
            if !self.accept_next()? {
                break;
            }
        }

        if self.active.is_some() {
            self.pause_listener()
        } else {
            self.resume_listener()
        }
    }

    /// Accept one pending connection and serve what it has already sent.
    ///
    /// Returns `false` once the backlog is empty.
    fn accept_next(&mut self) -> Result<bool, ResponderError> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    if let Err(e) = self.poll.registry().register(
                        &mut stream,
                        CONNECTION_TOKEN,
                        Interest::READABLE,
                    ) {
                        warn!(peer = %peer, error = %e, "Failed to register connection, dropping");
                        continue;
                    }

                    debug!(peer = %peer, "Accepted connection");
                    self.active = Some(ActiveConnection {
                        stream,
                        peer,
                        accepted_at: Utc::now(),
                        session: Session::new(),
                        awaiting_writable: false,
                    });

                    // the peer may have written before we registered
                    self.drive_active();
                    return Ok(true);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if is_transient_accept_error(&e) => {
                    debug!(error = %e, "Transient accept failure, retrying");
                }
                Err(e) => return Err(ResponderError::Accept(e)),
            }
        }
    }

    fn pause_listener(&mut self) -> Result<(), ResponderError> {
        if self.listening {
            self.poll
                .registry()
                .deregister(&mut self.listener)
                .map_err(ResponderError::Accept)?;
            self.listening = false;
        }
        Ok(())
    }

    fn resume_listener(&mut self) -> Result<(), ResponderError> {
        if !self.listening {
            self.poll
                .registry()
                .register(&mut self.listener, LISTENER_TOKEN, Interest::READABLE)
                .map_err(ResponderError::Accept)?;
            self.listening = true;
        }
        Ok(())
    }

    /// Make progress on the active connection, closing it once it ends.
    fn drive_active(&mut self) {
        let conn = match self.active.as_mut() {
            Some(conn) => conn,
            None => return,
        };

        let result = match drive(conn, &mut self.chunk, &self.poll) {
            Ok(Progress::Open) => return,
            Ok(Progress::Closed) => Ok(()),
            Err(e) => Err(e),
        };

        if let Some(mut conn) = self.active.take() {
            if let Err(e) = self.poll.registry().deregister(&mut conn.stream) {
                debug!(peer = %conn.peer, error = %e, "Failed to deregister connection");
            }
            ConnectionSummary::finish(conn.peer, conn.accepted_at, conn.session.replies(), result);
            debug!(peer = %conn.peer, "Connection dropped");
        }
    }
}

/// Read chunks and flush replies until the socket would block or the
/// connection ends.
fn drive(
    conn: &mut ActiveConnection,
    chunk: &mut [u8],
    poll: &Poll,
) -> Result<Progress, ResponderError> {
    loop {
        if conn.session.has_pending() {
            let total = conn.session.reply_len();
            let written = total - conn.session.pending().len();
            match conn.stream.write(conn.session.pending()) {
                Ok(0) => {
                    return Err(ResponderError::Write {
                        written,
                        total,
                        source: io::Error::new(io::ErrorKind::WriteZero, "write returned 0"),
                    });
                }
                Ok(n) => {
                    if conn.session.consume(n) {
                        trace!(reply = conn.session.replies() - 1, "Sent reply");
                        if conn.awaiting_writable {
                            set_interest(conn, poll, Interest::READABLE)?;
                            conn.awaiting_writable = false;
                        }
                    }
                    continue;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !conn.awaiting_writable {
                        set_interest(conn, poll, Interest::WRITABLE)?;
                        conn.awaiting_writable = true;
                    }
                    return Ok(Progress::Open);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(ResponderError::Write {
                        written,
                        total,
                        source,
                    })
                }
            }
        }

        match conn.stream.read(chunk) {
            Ok(0) => {
                trace!("Peer closed connection");
                return Ok(Progress::Closed);
            }
            Ok(n) => {
                trace!(bytes = n, "Received chunk");
                conn.session.on_chunk(n);
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Progress::Open),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ResponderError::Read(e)),
        }
    }
}

fn set_interest(
    conn: &mut ActiveConnection,
    poll: &Poll,
    interest: Interest,
) -> Result<(), ResponderError> {
    // a connection that can no longer be polled is as good as unreadable
    poll.registry()
        .reregister(&mut conn.stream, CONNECTION_TOKEN, interest)
        .map_err(ResponderError::Read)
}
