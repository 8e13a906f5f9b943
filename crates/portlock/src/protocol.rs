//! Line-based wire protocol spoken between a holder and its waiters
//!
//! Every message is a single `\n`-terminated line carrying a fixed prefix,
//! so that arbitrary traffic on the port is never mistaken for a lock peer.

use std::io::{self, BufRead, BufReader, Read, Write};

/// Literal prefix carried by every protocol line
pub const PREFIX: &str = "PORT_LOCK::";

/// Messages exchanged over a lock connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Waiter -> holder: "are you a cooperating lock holder?"
    Check,
    /// Holder -> waiter: answer to [`Message::Check`]
    Success,
    /// Holder -> waiter: the lock is being released
    Release,
}

impl Message {
    fn token(self) -> &'static str {
        match self {
            Message::Check => "CHECK",
            Message::Success => "SUCCESS",
            Message::Release => "RELEASE",
        }
    }

    /// Renders the message as a full protocol line, including the newline.
    pub fn to_line(self) -> String {
        format!("{}{}\n", PREFIX, self.token())
    }

    /// Parses one received line. Trailing `\r\n` or `\n` is ignored.
    ///
    /// Returns `None` for anything that is not an exact protocol message.
    pub fn parse(line: &str) -> Option<Self> {
        let token = line
            .trim_end_matches(['\r', '\n'])
            .strip_prefix(PREFIX)?;

        match token {
            "CHECK" => Some(Message::Check),
            "SUCCESS" => Some(Message::Success),
            "RELEASE" => Some(Message::Release),
            _ => None,
        }
    }
}

/// Writes `message` and flushes the writer.
pub fn send<W: Write>(writer: &mut W, message: Message) -> io::Result<()> {
    writer.write_all(message.to_line().as_bytes())?;
    writer.flush()
}

/// What a single line read produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A well-formed protocol message
    Message(Message),
    /// A line that is not part of the protocol
    Unexpected(String),
    /// The peer closed the connection
    Closed,
}

/// Reads protocol lines from a stream whose reads may time out.
///
/// Bytes of a line cut short by a read timeout stay buffered, and the next
/// [`LineReader::receive`] resumes that line instead of starting over.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            pending: Vec::new(),
        }
    }

    pub fn get_ref(&self) -> &R {
        self.inner.get_ref()
    }

    /// Reads the next line.
    ///
    /// Read timeouts configured on the underlying socket surface as `Err` with
    /// kind `WouldBlock` or `TimedOut`; see [`is_timeout`]. A line that ends
    /// at EOF without a newline is still returned as a line.
    pub fn receive(&mut self) -> io::Result<Received> {
        if self.inner.read_until(b'\n', &mut self.pending)? == 0 {
            return Ok(Received::Closed);
        }

        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();

        Ok(match Message::parse(&line) {
            Some(message) => Received::Message(message),
            None => Received::Unexpected(line.trim_end().to_string()),
        })
    }
}

/// Whether `err` is a socket read timeout.
///
/// Unix reports `WouldBlock` for an expired `SO_RCVTIMEO`, Windows reports
/// `TimedOut`.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Whether `err` means the peer went away rather than misbehaved.
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
