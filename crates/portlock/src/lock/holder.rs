//! Holder role: the bound listener, its accept loop and the waiter registry

use super::{recover, PortLockError};
use crate::config::PortLockConfig;
use crate::protocol::{self, LineReader, Message, Received};
use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Open waiter connections keyed by their ephemeral peer port
type Registry = Arc<Mutex<HashMap<u16, TcpStream>>>;

fn registry(registry: &Registry) -> MutexGuard<'_, HashMap<u16, TcpStream>> {
    recover(registry.lock())
}

/// Holder state, alive from a successful bind until release
#[derive(Debug)]
pub(crate) struct Holder {
    addr: SocketAddr,
    registry: Registry,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Holder {
    /// Takes ownership of a freshly bound listener and starts answering
    /// challenges on it.
    pub(crate) fn start(
        listener: TcpListener,
        config: &PortLockConfig,
    ) -> Result<Self, PortLockError> {
        let addr = config.addr();
        listener
            .set_nonblocking(true)
            .map_err(|e| PortLockError::io(e, addr, "configure listener"))?;

        let registry = Registry::default();
        let shutdown = Arc::new(AtomicBool::new(false));
        let accept_loop = AcceptLoop {
            listener,
            registry: Arc::clone(&registry),
            shutdown: Arc::clone(&shutdown),
            read_timeout: config.challenge_timeout(),
            poll_interval: config.accept_poll_interval(),
        };

        let worker = thread::Builder::new()
            .name(format!("portlock-accept-{}", addr.port()))
            .spawn(move || accept_loop.run())
            .map_err(|e| PortLockError::io(e, addr, "spawn accept loop"))?;

        Ok(Self {
            addr,
            registry,
            shutdown,
            worker: Some(worker),
        })
    }

    pub(crate) fn waiter_count(&self) -> usize {
        registry(&self.registry).len()
    }

    /// Notifies every registered waiter, then closes the listener and joins
    /// the accept loop.
    ///
    /// Failures are logged per connection and never stop the sequence.
    pub(crate) fn release(mut self) {
        let waiters = std::mem::take(&mut *registry(&self.registry));
        debug!(addr = %self.addr, waiters = waiters.len(), "notifying waiters");
        for (peer_port, stream) in waiters {
            notify_release(peer_port, stream);
        }

        self.stop();

        // Registered between the broadcast and the stop; they see EOF instead.
        // Challenge threads still running find the shutdown flag set.
        let late = std::mem::take(&mut *registry(&self.registry));
        if !late.is_empty() {
            debug!(addr = %self.addr, late = late.len(), "closing late waiter connections");
        }
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(addr = %self.addr, "accept loop panicked");
            }
            debug!(addr = %self.addr, "listener closed");
        }
    }
}

impl Drop for Holder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn notify_release(peer_port: u16, mut stream: TcpStream) {
    if let Err(e) = protocol::send(&mut stream, Message::Release) {
        if protocol::is_disconnect(&e) {
            debug!(peer_port, "waiter already gone: {}", e);
        } else {
            warn!(peer_port, "failed to send release notification: {}", e);
        }
    }

    // NotConnected just means the peer closed first
    if let Err(e) = stream.shutdown(Shutdown::Both) {
        debug!(peer_port, "shutdown of waiter connection failed: {}", e);
    }
}

/// The holder's accept worker. Owns the listener, so the socket closes
/// exactly when the loop returns.
struct AcceptLoop {
    listener: TcpListener,
    registry: Registry,
    shutdown: Arc<AtomicBool>,
    read_timeout: Duration,
    poll_interval: Duration,
}

impl AcceptLoop {
    /// Hands every accepted connection to its own challenge thread; the loop
    /// itself never reads from a client.
    fn run(self) {
        while !self.shutdown.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, peer)) => self.dispatch(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(self.poll_interval);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("accept failed: {}", e);
                    thread::sleep(self.poll_interval);
                }
            }
        }
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        let challenge = Challenge {
            registry: Arc::clone(&self.registry),
            shutdown: Arc::clone(&self.shutdown),
            read_timeout: self.read_timeout,
        };

        let spawned = thread::Builder::new()
            .name(format!("portlock-challenge-{}", peer.port()))
            .spawn(move || {
                if let Err(e) = challenge.answer(stream, peer) {
                    debug!(%peer, "dropping connection: {}", e);
                }
            });
        // The stream moved into the closure is dropped with it, closing the
        // connection; the peer sees EOF and retries.
        if let Err(e) = spawned {
            warn!(%peer, "failed to spawn challenge thread: {}", e);
        }
    }
}

/// Answers a single accepted connection
struct Challenge {
    registry: Registry,
    shutdown: Arc<AtomicBool>,
    read_timeout: Duration,
}

impl Challenge {
    /// Reads one line; a `CHECK` is answered and the connection is kept
    /// as the channel for the later release notification.
    fn answer(self, stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
        // Some platforms hand out accepted sockets in the listener's mode
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        stream.set_write_timeout(Some(self.read_timeout))?;

        let mut reader = LineReader::new(stream.try_clone()?);
        match reader.receive()? {
            Received::Message(Message::Check) => {
                let mut stream = stream;
                protocol::send(&mut stream, Message::Success)?;

                // Checked under the registry lock so nothing is registered
                // after release has drained the registry for the last time.
                let mut waiters = registry(&self.registry);
                if self.shutdown.load(Ordering::Acquire) {
                    debug!(%peer, "holder released, closing challenge connection");
                    return Ok(());
                }
                prune_closed(&mut waiters);
                waiters.insert(peer.port(), stream);
                debug!(peer_port = peer.port(), waiters = waiters.len(), "registered waiter");
            }
            other => debug!(%peer, "ignoring non-challenge input: {:?}", other),
        }
        Ok(())
    }
}

/// Drops registered connections whose peer has already hung up, such as the
/// short-lived challenge connections.
fn prune_closed(waiters: &mut HashMap<u16, TcpStream>) {
    waiters.retain(|_, stream| is_open(stream));
}

fn is_open(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return false;
    }
    let mut byte = [0u8; 1];
    let open = match stream.peek(&mut byte) {
        Ok(0) => false,
        Ok(_) => true,
        Err(e) => e.kind() == io::ErrorKind::WouldBlock,
    };
    open && stream.set_nonblocking(false).is_ok()
}
