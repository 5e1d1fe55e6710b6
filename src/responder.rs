//! The responder: bind, then serve one connection at a time.
//!
//! Each connection gets its own reply counter starting at zero. Every
//! non-empty chunk read from it is answered with `PONG <counter>\0`; an empty
//! read means the peer is gone and the responder goes back to accepting.

use crate::config::{ResponderConfig, RuntimeType};
use crate::connection::ConnectionSummary;
use crate::error::{is_transient_accept_error, ResponderError};
use crate::listener::ListenerEndpoint;
use crate::protocol::{encode_reply, ReplyCounter, MAX_REPLY_LEN};
use crate::runtime;
use bytes::BytesMut;
use chrono::Utc;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use tracing::{debug, info, trace};

/// Sequential PONG responder.
pub struct EchoResponder {
    config: ResponderConfig,
    endpoint: ListenerEndpoint,
    listener: TcpListener,
}

impl EchoResponder {
    /// Bind and start listening.
    pub fn start(config: ResponderConfig) -> Result<Self, ResponderError> {
        let requested = format!("{}:{}", config.address, config.port);
        let endpoint = ListenerEndpoint::resolve(&config.address, config.port, config.backlog)
            .map_err(|source| ResponderError::Bind {
                addr: requested.clone(),
                source,
            })?;
        let listener = endpoint.bind().map_err(|source| ResponderError::Bind {
            addr: requested,
            source,
        })?;

        let local = listener.local_addr().map_err(|source| ResponderError::Bind {
            addr: endpoint.addr().to_string(),
            source,
        })?;
        info!(
            address = %local,
            backlog = endpoint.backlog(),
            max_chunk_size = config.max_chunk_size,
            runtime = ?config.runtime,
            "Responder listening"
        );

        Ok(EchoResponder {
            config,
            endpoint,
            listener,
        })
    }

    /// Address actually bound, which differs from the endpoint for port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn endpoint(&self) -> &ListenerEndpoint {
        &self.endpoint
    }

    pub fn config(&self) -> &ResponderConfig {
        &self.config
    }

    /// Get a reference to the listening socket for testing
    #[cfg(test)]
    pub(crate) fn listener(&self) -> &TcpListener {
        &self.listener
    }

    /// Serve connections until the listening socket fails.
    ///
    /// Never returns `Ok`; the only way out is a fatal `Accept` error.
    pub fn run(self) -> Result<(), ResponderError> {
        match self.config.runtime {
            RuntimeType::Blocking => {
                info!("Using blocking runtime");
                loop {
                    self.serve_next()?;
                }
            }
            RuntimeType::Mio => runtime::run_mio(self.listener, &self.config),
            RuntimeType::Tokio => runtime::run_tokio(self.listener, &self.config),
        }
    }

    /// Accept one connection and serve it until it closes.
    ///
    /// Only accept failures are returned as errors; a failed connection is
    /// reported and summarised.
    pub fn serve_next(&self) -> Result<ConnectionSummary, ResponderError> {
        let (mut stream, peer) = accept(&self.listener)?;
        let accepted_at = Utc::now();
        debug!(peer = %peer, "Accepted connection");

        let mut counter = ReplyCounter::new();
        let result = serve_connection(&mut stream, self.config.max_chunk_size, &mut counter);
        drop(stream);

        Ok(ConnectionSummary::finish(
            peer,
            accepted_at,
            counter.value(),
            result,
        ))
    }
}

fn accept(listener: &TcpListener) -> Result<(TcpStream, SocketAddr), ResponderError> {
    loop {
        match listener.accept() {
            Ok(accepted) => return Ok(accepted),
            Err(e) if is_transient_accept_error(&e) => {
                debug!(error = %e, "Transient accept failure, retrying");
            }
            Err(e) => return Err(ResponderError::Accept(e)),
        }
    }
}

/// Answer every chunk on `stream` until the peer closes it.
///
/// `counter` holds the number of replies fully written, including when an
/// error cuts the connection short.
pub fn serve_connection<S: Read + Write>(
    stream: &mut S,
    max_chunk_size: usize,
    counter: &mut ReplyCounter,
) -> Result<(), ResponderError> {
    let mut chunk = vec![0u8; max_chunk_size];
    let mut reply = BytesMut::with_capacity(MAX_REPLY_LEN);

    loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) => {
                trace!("Peer closed connection");
                return Ok(());
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ResponderError::Read(e)),
        };
        trace!(bytes = n, "Received chunk");

        reply.clear();
        encode_reply(counter.value(), &mut reply);
        write_reply(stream, &reply)?;
        trace!(reply = counter.value(), "Sent reply");
        counter.advance();
    }
}

/// Write the whole reply, picking up after short writes.
fn write_reply<W: Write>(stream: &mut W, reply: &[u8]) -> Result<(), ResponderError> {
    let total = reply.len();
    let mut written = 0;

    while written < total {
        match stream.write(&reply[written..]) {
            Ok(0) => {
                return Err(ResponderError::Write {
                    written,
                    total,
                    source: io::Error::new(io::ErrorKind::WriteZero, "write returned 0"),
                });
            }
            Ok(n) => {
                written += n;
                if written < total {
                    trace!(written, total, "Partial write");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(ResponderError::Write {
                    written,
                    total,
                    source,
                })
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::CloseReason;
    use crate::testing::{self, MockStream, WriteStep};
    use std::thread;

    #[test]
    fn test_hello_world_in_memory() {
        let mut stream = MockStream::new(vec![Ok(b"hello".to_vec()), Ok(b"world".to_vec())]);
        let mut counter = ReplyCounter::new();

        serve_connection(&mut stream, 256, &mut counter).unwrap();

        assert_eq!(stream.written, b"PONG 0\0PONG 1\0");
        assert_eq!(counter.value(), 2);
    }

    #[test]
    fn test_kth_reply_carries_k() {
        let chunks = (0..12).map(|i| Ok(vec![b'x'; i + 1])).collect();
        let mut stream = MockStream::new(chunks);
        let mut counter = ReplyCounter::new();

        serve_connection(&mut stream, 256, &mut counter).unwrap();

        let expected: Vec<u8> = (0..12)
            .flat_map(|k| format!("PONG {}\0", k).into_bytes())
            .collect();
        assert_eq!(stream.written, expected);
        assert_eq!(counter.value(), 12);
    }

    #[test]
    fn test_reads_never_exceed_chunk_size() {
        let mut stream = MockStream::new(vec![Ok(vec![7u8; 300])]);
        let mut counter = ReplyCounter::new();

        serve_connection(&mut stream, 256, &mut counter).unwrap();

        assert!(stream.read_sizes.iter().all(|&size| size == 256));
        assert_eq!(stream.written, b"PONG 0\0PONG 1\0");
    }

    #[test]
    fn test_full_size_chunk_gets_one_reply() {
        let mut stream = MockStream::new(vec![Ok(vec![7u8; 256])]);
        let mut counter = ReplyCounter::new();

        serve_connection(&mut stream, 256, &mut counter).unwrap();

        assert_eq!(stream.read_sizes, vec![256, 256]);
        assert_eq!(stream.written, b"PONG 0\0");
        assert_eq!(counter.value(), 1);
    }

    #[test]
    fn test_partial_writes_are_completed() {
        let mut stream = MockStream::new(vec![Ok(b"hello".to_vec()), Ok(b"world".to_vec())]);
        stream.max_write = 3;
        let mut counter = ReplyCounter::new();

        serve_connection(&mut stream, 256, &mut counter).unwrap();

        assert_eq!(stream.written, b"PONG 0\0PONG 1\0");
        assert_eq!(counter.value(), 2);
    }

    #[test]
    fn test_interrupted_calls_are_retried() {
        let mut stream = MockStream::new(vec![
            Err(io::ErrorKind::Interrupted),
            Ok(b"ping".to_vec()),
        ]);
        stream.writes.push_back(WriteStep::Fail(io::ErrorKind::Interrupted));
        let mut counter = ReplyCounter::new();

        serve_connection(&mut stream, 256, &mut counter).unwrap();

        assert_eq!(stream.written, b"PONG 0\0");
    }

    #[test]
    fn test_stalled_write_is_write_error() {
        let mut stream = MockStream::new(vec![Ok(b"hello".to_vec())]);
        stream.writes.push_back(WriteStep::Accept(3));
        stream.writes.push_back(WriteStep::Accept(0));
        let mut counter = ReplyCounter::new();

        let err = serve_connection(&mut stream, 256, &mut counter).unwrap_err();

        assert!(matches!(
            err,
            ResponderError::Write {
                written: 3,
                total: 7,
                ..
            }
        ));
        assert_eq!(counter.value(), 0);
    }

    #[test]
    fn test_read_failure_is_read_error() {
        let mut stream = MockStream::new(vec![
            Ok(b"one".to_vec()),
            Err(io::ErrorKind::ConnectionReset),
        ]);
        let mut counter = ReplyCounter::new();

        let err = serve_connection(&mut stream, 256, &mut counter).unwrap_err();

        assert!(matches!(err, ResponderError::Read(_)));
        assert!(!err.is_fatal());
        assert_eq!(counter.value(), 1);
    }

    #[test]
    fn test_bind_in_use_fails_before_run() {
        let first = EchoResponder::start(testing::local_config(RuntimeType::Blocking)).unwrap();
        let port = first.local_addr().unwrap().port();

        let mut config = testing::local_config(RuntimeType::Blocking);
        config.port = port;
        let err = EchoResponder::start(config).err().unwrap();

        assert!(matches!(err, ResponderError::Bind { .. }));
        assert!(err.is_fatal());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_blocking_accept_failure_ends_run() {
        testing::assert_accept_failure_is_fatal(RuntimeType::Blocking);
    }

    #[test]
    fn test_serve_next_summarises_connection() {
        let responder = EchoResponder::start(testing::local_config(RuntimeType::Blocking)).unwrap();
        let addr = responder.local_addr().unwrap();

        let client = thread::spawn(move || {
            let mut stream = testing::connect(addr);
            for k in 0..3 {
                let reply = testing::exchange(&mut stream, b"chunk");
                assert_eq!(reply, format!("PONG {}\0", k).into_bytes());
            }
        });

        let summary = responder.serve_next().unwrap();
        client.join().unwrap();

        assert_eq!(summary.replies, 3);
        assert_eq!(summary.close, CloseReason::PeerClosed);
    }

    #[test]
    fn test_blocking_hello_world() {
        let addr = testing::spawn_responder(RuntimeType::Blocking);
        testing::assert_hello_world(addr);
    }

    #[test]
    fn test_blocking_counter_resets_per_connection() {
        let addr = testing::spawn_responder(RuntimeType::Blocking);
        testing::assert_counter_resets(addr);
    }

    #[test]
    fn test_blocking_serves_one_connection_at_a_time() {
        let addr = testing::spawn_responder(RuntimeType::Blocking);
        testing::assert_one_connection_at_a_time(addr);
    }
}
