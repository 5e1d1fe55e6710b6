//! PONG reply protocol.
//!
//! Every non-empty chunk read from a connection is answered with one reply:
//!
//! ```text
//! Request:  <any bytes>
//! Response: PONG <n>\0
//! ```
//!
//! `<n>` is the number of replies already sent on the connection, in decimal
//! without leading zeros. The trailing zero byte terminates the reply on the
//! wire; receivers split the stream on it.

use bytes::{Buf, BytesMut};

/// Literal tag that starts every reply.
pub const REPLY_TAG: &[u8] = b"PONG ";

/// Byte that ends every reply.
pub const TERMINATOR: u8 = 0;

/// Longest possible reply: tag, a full `u64`, terminator.
pub const MAX_REPLY_LEN: usize = REPLY_TAG.len() + 20 + 1;

/// Number of replies completed on one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyCounter(u64);

impl ReplyCounter {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Record one fully delivered reply.
    pub fn advance(&mut self) {
        self.0 += 1;
    }
}

/// Append `PONG <counter>\0` to `output`.
pub fn encode_reply(counter: u64, output: &mut BytesMut) {
    let digits = counter.to_string();
    output.reserve(REPLY_TAG.len() + digits.len() + 1);
    output.extend_from_slice(REPLY_TAG);
    output.extend_from_slice(digits.as_bytes());
    output.extend_from_slice(&[TERMINATOR]);
}

/// Parse result.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
    /// A complete reply with its counter and the bytes consumed.
    Complete(u64, usize),
    /// No terminator yet.
    Incomplete,
    /// Terminated frame that is not a valid reply.
    Error,
}

/// Parse one reply from the front of `input`.
pub fn parse_reply(input: &[u8]) -> ParseResult {
    let end = match input.iter().position(|&b| b == TERMINATOR) {
        Some(pos) => pos,
        None if input.len() >= MAX_REPLY_LEN => return ParseResult::Error,
        None => return ParseResult::Incomplete,
    };

    let consumed = end + 1;
    let digits = match input[..end].strip_prefix(REPLY_TAG) {
        Some(digits) => digits,
        None => return ParseResult::Error,
    };

    // "0" is the only number allowed to start with a zero
    let canonical = !digits.is_empty()
        && digits.iter().all(u8::is_ascii_digit)
        && (digits[0] != b'0' || digits.len() == 1);
    if !canonical {
        return ParseResult::Error;
    }

    match std::str::from_utf8(digits).ok().and_then(|s| s.parse().ok()) {
        Some(n) => ParseResult::Complete(n, consumed),
        None => ParseResult::Error,
    }
}

/// Per-connection reply state for readiness and async backends.
///
/// A reply is prepared for each chunk, drained as the socket accepts bytes,
/// and only counted once its last byte has been written.
#[derive(Debug, Default)]
pub struct Session {
    counter: ReplyCounter,
    reply: BytesMut,
}

impl Session {
    pub fn new() -> Self {
        Self {
            counter: ReplyCounter::new(),
            reply: BytesMut::with_capacity(MAX_REPLY_LEN),
        }
    }

    /// Prepare the reply to a chunk of `len` bytes.
    ///
    /// Returns `false` (and prepares nothing) for an empty chunk, which marks
    /// the end of the connection. Must not be called while a reply is pending.
    pub fn on_chunk(&mut self, len: usize) -> bool {
        debug_assert!(self.reply.is_empty(), "previous reply still pending");
        if len == 0 {
            return false;
        }
        encode_reply(self.counter.value(), &mut self.reply);
        true
    }

    /// Bytes of the current reply that are not written yet.
    pub fn pending(&self) -> &[u8] {
        &self.reply
    }

    pub fn has_pending(&self) -> bool {
        !self.reply.is_empty()
    }

    /// Record `n` bytes written. Returns `true` once the reply is complete.
    pub fn consume(&mut self, n: usize) -> bool {
        let n = n.min(self.reply.len());
        self.reply.advance(n);
        if self.reply.is_empty() && n > 0 {
            self.counter.advance();
            return true;
        }
        false
    }

    /// Number of replies fully written so far.
    pub fn replies(&self) -> u64 {
        self.counter.value()
    }

    /// Total length of the reply currently in flight, for error reports.
    pub fn reply_len(&self) -> usize {
        reply_len(self.counter.value())
    }
}

/// Encoded length of the reply carrying `counter`.
pub fn reply_len(counter: u64) -> usize {
    let mut digits = 1;
    let mut n = counter;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    REPLY_TAG.len() + digits + 1
}

/// Bytes on the wire that do not form a `PONG <n>` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedReply;

impl std::fmt::Display for MalformedReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed reply")
    }
}

impl std::error::Error for MalformedReply {}

/// Splits a received byte stream into replies, keeping partial frames.
#[derive(Debug, Default)]
pub struct ReplyDecoder {
    buffer: BytesMut,
}

impl ReplyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Next complete reply, `Ok(None)` if more bytes are needed.
    pub fn next_reply(&mut self) -> Result<Option<u64>, MalformedReply> {
        match parse_reply(&self.buffer) {
            ParseResult::Complete(n, consumed) => {
                self.buffer.advance(consumed);
                Ok(Some(n))
            }
            ParseResult::Incomplete => Ok(None),
            ParseResult::Error => Err(MalformedReply),
        }
    }

    /// Bytes received but not yet part of a complete reply.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
