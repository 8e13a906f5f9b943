//! Fake occupants of a lock port
//!
//! An [`Occupant`] binds a port and behaves like something a contender may
//! find there: an unrelated service, a hung process, or a holder that stops
//! answering. It writes raw lines, independent of the library's protocol
//! module, so tests also pin the wire format.

use std::io::{BufRead, BufReader, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Line a cooperating holder answers a challenge with
pub const SUCCESS_LINE: &str = "PORT_LOCK::SUCCESS";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub enum OccupantBehavior {
    /// Accepts every connection and answers its first line with this line
    Reply(String),
    /// Keeps the port bound without ever accepting
    Silent,
    /// Answers the first `answers` connections like a lock holder and keeps
    /// them open, then stops accepting while keeping the port bound
    HolderThenSilent { answers: usize },
}

/// A running fake occupant; unbinds the port when dropped
pub struct Occupant {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Occupant {
    /// Binds `port` on loopback and starts serving `behavior`
    ///
    /// # Panics
    ///
    /// Panics if the port cannot be bound.
    pub fn start(port: u16, behavior: OccupantBehavior) -> Self {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .unwrap_or_else(|e| panic!("Failed to bind occupant on port {}: {}", port, e));
        listener
            .set_nonblocking(true)
            .expect("Failed to make occupant listener non-blocking");

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let worker = thread::spawn(move || serve(listener, behavior, &flag));

        Self {
            stop,
            worker: Some(worker),
        }
    }
}

impl Drop for Occupant {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn serve(listener: TcpListener, behavior: OccupantBehavior, stop: &AtomicBool) {
    // Answered connections stay open until the occupant stops
    let mut kept: Vec<TcpStream> = Vec::new();

    while !stop.load(Ordering::Acquire) {
        let (accepting, reply) = match &behavior {
            OccupantBehavior::Reply(line) => (true, line.as_str()),
            OccupantBehavior::Silent => (false, ""),
            OccupantBehavior::HolderThenSilent { answers } => (kept.len() < *answers, SUCCESS_LINE),
        };

        if !accepting {
            thread::sleep(POLL_INTERVAL);
            continue;
        }

        match listener.accept() {
            Ok((stream, _)) => {
                if let Some(stream) = answer(stream, reply) {
                    kept.push(stream);
                }
            }
            Err(_) => thread::sleep(POLL_INTERVAL),
        }
    }
}

fn answer(stream: TcpStream, reply: &str) -> Option<TcpStream> {
    stream.set_nonblocking(false).ok()?;
    stream.set_read_timeout(Some(Duration::from_secs(1))).ok()?;

    let mut reader = BufReader::new(stream.try_clone().ok()?);
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;

    let mut stream = stream;
    writeln!(stream, "{}", reply).ok()?;
    Some(stream)
}
