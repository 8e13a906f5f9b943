//! Waiter role: challenge the occupant of the port and wait for its release

use super::PortLockError;
use crate::config::PortLockConfig;
use crate::protocol::{self, LineReader, Message, Received};
use std::io;
use std::net::TcpStream;
use std::time::Duration;
use tracing::{debug, trace};

/// Why the occupant of the port was not confirmed as a lock holder
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Refusal {
    /// Nobody answered at the connection level: refused, reset or closed
    Departed,
    /// Something answered, but not with the protocol
    Mismatch(String),
}

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    /// The holder sent `RELEASE`
    Released,
    /// The connection to the holder dropped
    Disconnected,
    /// A liveness re-check after a read timeout was not confirmed
    HolderVanished,
}

/// Opens a connection, sends `CHECK` and expects `SUCCESS` within the
/// challenge timeout.
fn connect_confirmed(config: &PortLockConfig) -> Result<LineReader<TcpStream>, Refusal> {
    let addr = config.addr();
    let timeout = config.challenge_timeout();

    let mut stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
        if protocol::is_timeout(&e) {
            Refusal::Mismatch(format!("connect timed out after {:?}", timeout))
        } else {
            trace!(%addr, "challenge connect failed: {}", e);
            Refusal::Departed
        }
    })?;

    if let Err(e) = send_check(&mut stream, timeout) {
        trace!(%addr, "challenge send failed: {}", e);
        return Err(Refusal::Departed);
    }

    let mut reader = LineReader::new(stream);
    match reader.receive() {
        Ok(Received::Message(Message::Success)) => Ok(reader),
        Ok(Received::Message(other)) => Err(Refusal::Mismatch(format!(
            "expected SUCCESS, got {:?}",
            other
        ))),
        Ok(Received::Unexpected(line)) => {
            Err(Refusal::Mismatch(format!("unexpected reply '{}'", line)))
        }
        Ok(Received::Closed) => Err(Refusal::Departed),
        Err(e) if protocol::is_timeout(&e) => Err(Refusal::Mismatch(format!(
            "no reply within {:?}",
            timeout
        ))),
        Err(e) => {
            trace!(%addr, "challenge read failed: {}", e);
            Err(Refusal::Departed)
        }
    }
}

fn send_check(stream: &mut TcpStream, timeout: Duration) -> io::Result<()> {
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    protocol::send(stream, Message::Check)
}

/// Short-lived challenge: is the occupant a cooperating holder?
pub(crate) fn challenge(config: &PortLockConfig) -> Result<(), Refusal> {
    connect_confirmed(config).map(drop)
}

/// Confirms the occupant, then blocks on a registered connection until the
/// holder releases, disconnects or stops answering.
///
/// A protocol mismatch on the initial challenge is the only error.
pub(crate) fn wait_for_release(config: &PortLockConfig) -> Result<WaitOutcome, PortLockError> {
    let addr = config.addr();
    let mismatch = |reason| PortLockError::ProtocolMismatch { addr, reason };

    match challenge(config) {
        Ok(()) => {}
        Err(Refusal::Departed) => return Ok(WaitOutcome::Disconnected),
        Err(Refusal::Mismatch(reason)) => return Err(mismatch(reason)),
    }

    let mut reader = match connect_confirmed(config) {
        Ok(reader) => reader,
        Err(Refusal::Departed) => return Ok(WaitOutcome::Disconnected),
        Err(Refusal::Mismatch(reason)) => return Err(mismatch(reason)),
    };
    reader
        .get_ref()
        .set_read_timeout(Some(config.wait_timeout()))
        .map_err(|e| PortLockError::io(e, addr, "configure wait connection"))?;

    debug!(%addr, "holder confirmed, waiting for release");
    loop {
        match reader.receive() {
            Ok(Received::Message(Message::Release)) => return Ok(WaitOutcome::Released),
            Ok(Received::Closed) => return Ok(WaitOutcome::Disconnected),
            Ok(other) => debug!(%addr, "ignoring {:?} while waiting", other),
            Err(e) if protocol::is_timeout(&e) => match challenge(config) {
                Ok(()) => trace!(%addr, "holder still alive"),
                Err(refusal) => {
                    debug!(%addr, "holder no longer answers: {:?}", refusal);
                    return Ok(WaitOutcome::HolderVanished);
                }
            },
            Err(e) => {
                debug!(%addr, "wait connection failed: {}", e);
                return Ok(WaitOutcome::Disconnected);
            }
        }
    }
}
