//! Port locking module for cross-process mutual exclusion
//!
//! A [`PortLock`] uses a loopback TCP port as the arbitration resource: the
//! process whose listener is bound to the port holds the lock. Processes that
//! lose the bind race confirm that the occupant speaks the lock protocol,
//! then wait on a connection to it until the holder announces its release.

use crate::config::PortLockConfig;
use std::sync::{LockResult, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, trace, warn};

mod acquire;
mod error;
mod gate;
mod guard;
mod holder;
mod waiter;

pub use error::PortLockError;
pub use guard::PortLockGuard;

use gate::{Entry, Gate};
use holder::Holder;


/// Recovers the data of a poisoned mutex; lock state stays usable after a
/// panicking caller.
pub(crate) fn recover<T>(result: LockResult<T>) -> T {
    result.unwrap_or_else(PoisonError::into_inner)
}

/// How an [`acquire`](PortLock::acquire) call obtained the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// This process bound the port and is the holder
    Bound,
    /// The previous holder stopped answering and the lock was taken without
    /// binding the port (only with [`VanishedPolicy::Assume`](crate::config::VanishedPolicy::Assume))
    Assumed,
}

impl Acquisition {
    pub fn is_bound(self) -> bool {
        self == Acquisition::Bound
    }
}

/// Observable state of a [`PortLock`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Attempting to bind the port
    Acquiring,
    /// Challenging or waiting on another holder
    Waiting,
    Holding,
    /// Acquired through the vanished-holder fallback, port not bound
    Assumed,
}

#[derive(Debug)]
enum LockState {
    Idle,
    Acquiring,
    Waiting,
    Holding(Holder),
    Assumed,
}

impl LockState {
    fn phase(&self) -> Phase {
        match self {
            LockState::Idle => Phase::Idle,
            LockState::Acquiring => Phase::Acquiring,
            LockState::Waiting => Phase::Waiting,
            LockState::Holding(_) => Phase::Holding,
            LockState::Assumed => Phase::Assumed,
        }
    }
}

/// A lock shared by every process on the host that uses the same port
///
/// Calls from threads of one process are serialized: the thread that returns
/// from [`acquire`](Self::acquire) owns the lock until it calls
/// [`release`](Self::release). The owning thread may acquire again; each
/// acquisition needs a matching release.
///
/// # Examples
///
/// ```no_run
/// use portlock::PortLock;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let lock = PortLock::with_port(32172);
/// lock.acquire()?;
/// // Critical section across processes
/// lock.release();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PortLock {
    config: PortLockConfig,
    gate: Gate,
    state: Mutex<LockState>,
}

impl PortLock {
    pub fn new(config: PortLockConfig) -> Self {
        Self {
            config,
            gate: Gate::default(),
            state: Mutex::new(LockState::Idle),
        }
    }

    /// Lock on `port` with default timeouts
    pub fn with_port(port: u16) -> Self {
        Self::new(PortLockConfig::with_port(port))
    }

    /// The process-wide lock configured from `PORTLOCK_*` environment
    /// variables on first use.
    ///
    /// Invalid variables are logged and the defaults are used instead.
    pub fn global() -> &'static PortLock {
        static GLOBAL: OnceLock<PortLock> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let config = PortLockConfig::from_env().unwrap_or_else(|e| {
                warn!("ignoring lock configuration from environment: {}", e);
                PortLockConfig::default()
            });
            PortLock::new(config)
        })
    }

    pub fn config(&self) -> &PortLockConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.state().phase()
    }

    /// Waiters currently registered with this process as holder
    pub fn waiter_count(&self) -> usize {
        match &*self.state() {
            LockState::Holding(holder) => holder.waiter_count(),
            _ => 0,
        }
    }

    /// Blocks until this process holds the lock.
    ///
    /// Every network read inside is bounded by a timeout, but the total wait
    /// is not: it lasts as long as other processes hold the lock.
    ///
    /// # Errors
    ///
    /// Returns [`PortLockError::ProtocolMismatch`] when the port is occupied
    /// by something that does not answer the lock challenge, and
    /// [`PortLockError::Io`] when the port cannot be bound for any other
    /// reason than being in use. On error the lock is not held.
    pub fn acquire(&self) -> Result<Acquisition, PortLockError> {
        trace!(port = self.config.port, "acquire");
        if self.gate.enter() == Entry::Reentered {
            return Ok(match self.phase() {
                Phase::Assumed => Acquisition::Assumed,
                _ => Acquisition::Bound,
            });
        }

        acquire::contend(self).inspect_err(|e| {
            debug!(port = self.config.port, "acquire failed: {}", e);
            self.set_state(LockState::Idle);
            self.gate.leave();
        })
    }

    /// Acquires the lock and returns a guard releasing it on drop.
    pub fn lock(&self) -> Result<PortLockGuard<'_>, PortLockError> {
        let acquisition = self.acquire()?;
        Ok(PortLockGuard::new(self, acquisition))
    }

    /// Releases the lock: notifies waiters, closes the port, and lets the
    /// next local thread in.
    ///
    /// A no-op when the calling thread does not hold the lock. A re-entrant
    /// hold only drops its count.
    pub fn release(&self) {
        match self.gate.holds() {
            0 => {
                trace!(port = self.config.port, "release without holding the lock");
                return;
            }
            1 => {}
            _ => {
                self.gate.leave();
                return;
            }
        }

        let previous = std::mem::replace(&mut *self.state(), LockState::Idle);
        if let LockState::Holding(holder) = previous {
            holder.release();
        }
        debug!(port = self.config.port, "lock released");
        self.gate.leave();
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        recover(self.state.lock())
    }

    fn set_state(&self, state: LockState) {
        *self.state() = state;
    }
}
