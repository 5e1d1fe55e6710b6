//! Helpers shared by the backend tests.

use crate::config::{ResponderConfig, RuntimeType};
use crate::protocol::TERMINATOR;
use crate::responder::EchoResponder;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

/// How the mock answers one write call.
pub enum WriteStep {
    /// Accept at most this many bytes.
    Accept(usize),
    Fail(io::ErrorKind),
}

/// Scripted in-memory stream.
///
/// Reads hand out the scripted chunks (split if the caller's buffer is
/// smaller) and then EOF. Writes follow `writes`, then accept up to
/// `max_write` bytes per call.
pub struct MockStream {
    pub reads: VecDeque<Result<Vec<u8>, io::ErrorKind>>,
    pub read_sizes: Vec<usize>,
    pub writes: VecDeque<WriteStep>,
    pub max_write: usize,
    pub written: Vec<u8>,
}

impl MockStream {
    pub fn new(reads: Vec<Result<Vec<u8>, io::ErrorKind>>) -> Self {
        Self {
            reads: reads.into(),
            read_sizes: Vec::new(),
            writes: VecDeque::new(),
            max_write: usize::MAX,
            written: Vec::new(),
        }
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_sizes.push(buf.len());
        match self.reads.pop_front() {
            None => Ok(0),
            Some(Err(kind)) => Err(io::Error::from(kind)),
            Some(Ok(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.reads.push_front(Ok(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let limit = match self.writes.pop_front() {
            Some(WriteStep::Fail(kind)) => return Err(io::Error::from(kind)),
            Some(WriteStep::Accept(limit)) => limit,
            None => self.max_write,
        };
        let n = buf.len().min(limit);
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Loopback config on an ephemeral port.
pub fn local_config(runtime: RuntimeType) -> ResponderConfig {
    ResponderConfig {
        address: "127.0.0.1".to_string(),
        port: 0,
        runtime,
        ..ResponderConfig::default()
    }
}

/// Start a responder on a background thread and return its address.
pub fn spawn_responder(runtime: RuntimeType) -> SocketAddr {
    spawn_with_config(local_config(runtime))
}

pub fn spawn_with_config(config: ResponderConfig) -> SocketAddr {
    let responder = EchoResponder::start(config).unwrap();
    let addr = responder.local_addr().unwrap();
    thread::spawn(move || {
        let _ = responder.run();
    });
    addr
}

pub fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

/// Read one reply, terminator included.
pub fn read_reply(stream: &mut TcpStream) -> Vec<u8> {
    let mut reply = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).unwrap();
        assert_eq!(n, 1, "connection closed mid-reply");
        reply.push(byte[0]);
        if byte[0] == TERMINATOR {
            return reply;
        }
    }
}

pub fn exchange(stream: &mut TcpStream, request: &[u8]) -> Vec<u8> {
    stream.write_all(request).unwrap();
    read_reply(stream)
}

pub fn assert_hello_world(addr: SocketAddr) {
    let mut stream = connect(addr);
    assert_eq!(
        exchange(&mut stream, b"hello"),
        [0x50, 0x4F, 0x4E, 0x47, 0x20, 0x30, 0x00]
    );
    assert_eq!(
        exchange(&mut stream, b"world"),
        [0x50, 0x4F, 0x4E, 0x47, 0x20, 0x31, 0x00]
    );
}

pub fn assert_counter_resets(addr: SocketAddr) {
    let mut first = connect(addr);
    for k in 0..5 {
        assert_eq!(exchange(&mut first, b"x"), format!("PONG {}\0", k).into_bytes());
    }
    drop(first);

    let mut second = connect(addr);
    assert_eq!(exchange(&mut second, b"y"), b"PONG 0\0");
    assert_eq!(exchange(&mut second, b"y"), b"PONG 1\0");
}

pub fn assert_one_connection_at_a_time(addr: SocketAddr) {
    let mut first = connect(addr);
    assert_eq!(exchange(&mut first, b"first"), b"PONG 0\0");

    // queued in the backlog, not served yet
    let mut second = connect(addr);
    second.write_all(b"second").unwrap();
    second
        .set_read_timeout(Some(Duration::from_millis(300)))
        .unwrap();
    let mut byte = [0u8; 1];
    let err = second.read(&mut byte).unwrap_err();
    assert!(matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    ));

    assert_eq!(exchange(&mut first, b"again"), b"PONG 1\0");
    drop(first);

    second
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(read_reply(&mut second), b"PONG 0\0");
}

/// Break the listening socket before `run` and expect a fatal accept error.
///
/// On Linux, shutting down a listening socket makes `accept` fail with
/// `EINVAL`.
#[cfg(target_os = "linux")]
pub fn assert_accept_failure_is_fatal(runtime: RuntimeType) {
    use crate::error::ResponderError;

    let responder = EchoResponder::start(local_config(runtime)).unwrap();
    socket2::SockRef::from(responder.listener())
        .shutdown(std::net::Shutdown::Read)
        .unwrap();

    let err = responder.run().unwrap_err();
    assert!(matches!(err, ResponderError::Accept(_)));
    assert!(err.is_fatal());
}
