//! Acquisition state machine: bind, or challenge and wait, until bound

use super::holder::Holder;
use super::waiter::{self, WaitOutcome};
use super::{Acquisition, LockState, PortLock, PortLockError};
use crate::config::VanishedPolicy;
use std::io;
use std::net::TcpListener;
use tracing::{debug, warn};

/// Runs the bind/challenge/wait cycle for a caller that owns the gate.
pub(crate) fn contend(lock: &PortLock) -> Result<Acquisition, PortLockError> {
    let config = lock.config();
    let addr = config.addr();
    let mut rounds: u64 = 0;

    loop {
        rounds = rounds.wrapping_add(1);
        lock.set_state(LockState::Acquiring);

        match TcpListener::bind(addr) {
            Ok(listener) => {
                let holder = Holder::start(listener, config)?;
                lock.set_state(LockState::Holding(holder));
                debug!(%addr, rounds, "lock acquired");
                return Ok(Acquisition::Bound);
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                debug!(%addr, "port in use, challenging occupant");
                lock.set_state(LockState::Waiting);

                match waiter::wait_for_release(config)? {
                    WaitOutcome::Released => debug!(%addr, "release received, rebinding"),
                    WaitOutcome::Disconnected => debug!(%addr, "holder departed, rebinding"),
                    WaitOutcome::HolderVanished => match config.on_holder_vanished {
                        VanishedPolicy::Rebind => {
                            debug!(%addr, "holder vanished, rebinding")
                        }
                        VanishedPolicy::Assume => {
                            warn!(%addr, "holder vanished, assuming the lock without binding");
                            lock.set_state(LockState::Assumed);
                            return Ok(Acquisition::Assumed);
                        }
                    },
                }
            }
            Err(e) => return Err(PortLockError::io(e, addr, "bind lock port")),
        }
    }
}
