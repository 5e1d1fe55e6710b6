//! Ping client.
//!
//! Sends `PING <seq>` requests, each zero-padded to a fixed payload size,
//! and waits for one `PONG <n>\0` reply per request.

use crate::protocol::{MalformedReply, ReplyDecoder};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default request size, matching small embedded senders.
pub const DEFAULT_PAYLOAD_SIZE: usize = 16;

/// Client errors
#[derive(Debug)]
pub enum ClientError {
    Connect(io::Error),
    Send(io::Error),
    Receive(io::Error),
    /// The responder closed the connection before a full reply arrived.
    Closed,
    Malformed(MalformedReply),
    PayloadTooSmall { needed: usize, size: usize },
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Connect(e) => write!(f, "Failed to connect: {}", e),
            ClientError::Send(e) => write!(f, "Failed to send ping: {}", e),
            ClientError::Receive(e) => write!(f, "Failed to receive reply: {}", e),
            ClientError::Closed => write!(f, "Connection closed before reply"),
            ClientError::Malformed(e) => write!(f, "Received {}", e),
            ClientError::PayloadTooSmall { needed, size } => write!(
                f,
                "Ping needs {} bytes but payload size is {}",
                needed, size
            ),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Connect(e) | ClientError::Send(e) | ClientError::Receive(e) => Some(e),
            ClientError::Malformed(e) => Some(e),
            _ => None,
        }
    }
}

/// Build `PING <seq>` padded with zeros to `payload_size` bytes.
pub fn encode_ping(seq: u64, payload_size: usize) -> Result<Vec<u8>, ClientError> {
    let text = format!("PING {}", seq);
    if text.len() > payload_size {
        return Err(ClientError::PayloadTooSmall {
            needed: text.len(),
            size: payload_size,
        });
    }
    let mut payload = vec![0u8; payload_size];
    payload[..text.len()].copy_from_slice(text.as_bytes());
    Ok(payload)
}

pub struct PingClient {
    stream: TcpStream,
    decoder: ReplyDecoder,
    payload_size: usize,
}

impl PingClient {
    pub fn connect<A: ToSocketAddrs>(addr: A, payload_size: usize) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).map_err(ClientError::Connect)?;
        stream.set_nodelay(true).map_err(ClientError::Connect)?;
        if let Ok(peer) = stream.peer_addr() {
            debug!(peer = %peer, "Connected");
        }
        Ok(Self {
            stream,
            decoder: ReplyDecoder::new(),
            payload_size,
        })
    }

    /// Limit how long `ping` waits for a reply.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.stream
            .set_read_timeout(timeout)
            .map_err(ClientError::Receive)
    }

    /// Send one ping and return the counter of the reply.
    pub fn ping(&mut self, seq: u64) -> Result<u64, ClientError> {
        let payload = encode_ping(seq, self.payload_size)?;
        self.stream.write_all(&payload).map_err(ClientError::Send)?;
        debug!(seq, "Sent ping");

        let mut buf = [0u8; 64];
        loop {
            if let Some(reply) = self.decoder.next_reply().map_err(ClientError::Malformed)? {
                return Ok(reply);
            }
            match self.stream.read(&mut buf) {
                Ok(0) => return Err(ClientError::Closed),
                Ok(n) => self.decoder.extend(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ClientError::Receive(e)),
            }
        }
    }

    /// Send `count` pings, `interval` apart, collecting the replies.
    pub fn run(&mut self, count: u64, interval: Duration) -> Result<Vec<u64>, ClientError> {
        let mut replies = Vec::new();
        for seq in 0..count {
            if seq > 0 && !interval.is_zero() {
                thread::sleep(interval);
            }
            let reply = self.ping(seq)?;
            if reply != seq {
                warn!(seq, reply, "Reply out of sequence");
            }
            info!(seq, reply, "PONG {}", reply);
            replies.push(reply);
        }
        Ok(replies)
    }
}
