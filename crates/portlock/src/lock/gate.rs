//! Process-local re-entrant gate
//!
//! Serializes local callers of one [`PortLock`](super::PortLock): only the
//! owning thread runs the bind/challenge/wait dance or the release sequence.
//! Unlike a `MutexGuard`, ownership outlives the call that took it and is
//! given back explicitly by `leave`.

use super::recover;
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct GateState {
    owner: Option<ThreadId>,
    holds: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Gate {
    state: Mutex<GateState>,
    opened: Condvar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Entry {
    /// The calling thread now owns the gate
    First,
    /// The calling thread already owned it; the hold count was bumped
    Reentered,
}

impl Gate {
    /// Blocks until the calling thread owns the gate.
    pub(crate) fn enter(&self) -> Entry {
        let me = thread::current().id();
        let mut state = recover(self.state.lock());

        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.holds = 1;
                    return Entry::First;
                }
                Some(owner) if owner == me => {
                    state.holds += 1;
                    return Entry::Reentered;
                }
                Some(_) => state = recover(self.opened.wait(state)),
            }
        }
    }

    /// Holds the calling thread has on the gate, 0 when it is not the owner.
    pub(crate) fn holds(&self) -> usize {
        let state = recover(self.state.lock());
        match state.owner {
            Some(owner) if owner == thread::current().id() => state.holds,
            _ => 0,
        }
    }

    /// Drops one hold; the last one opens the gate for other threads.
    ///
    /// Does nothing when called by a thread that does not own the gate.
    pub(crate) fn leave(&self) {
        let mut state = recover(self.state.lock());
        if state.owner != Some(thread::current().id()) {
            return;
        }

        state.holds = state.holds.saturating_sub(1);
        if state.holds == 0 {
            state.owner = None;
            self.opened.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_reentry_counts_holds() {
        let gate = Gate::default();
        assert_eq!(gate.enter(), Entry::First);
        assert_eq!(gate.enter(), Entry::Reentered);
        assert_eq!(gate.holds(), 2);

        gate.leave();
        assert_eq!(gate.holds(), 1);
        gate.leave();
        assert_eq!(gate.holds(), 0);
    }

    #[test]
    fn test_leave_by_non_owner_is_ignored() {
        let gate = Arc::new(Gate::default());
        gate.enter();

        let other = Arc::clone(&gate);
        thread::spawn(move || {
            assert_eq!(other.holds(), 0);
            other.leave();
        })
        .join()
        .unwrap();

        assert_eq!(gate.holds(), 1);
        gate.leave();
    }

    #[test]
    fn test_second_thread_blocks_until_opened() {
        let gate = Arc::new(Gate::default());
        gate.enter();

        let (tx, rx) = std::sync::mpsc::channel();
        let other = Arc::clone(&gate);
        let handle = thread::spawn(move || {
            let entry = other.enter();
            tx.send(entry).unwrap();
            other.leave();
        });

        assert!(
            rx.recv_timeout(Duration::from_millis(100)).is_err(),
            "second thread should wait while the gate is owned"
        );

        gate.leave();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Entry::First
        );
        handle.join().unwrap();
    }
}
