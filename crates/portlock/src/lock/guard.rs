//! RAII lock guard for automatic lock release

use super::{Acquisition, PortLock};
use std::marker::PhantomData;

/// RAII guard for port locks
///
/// When this guard is dropped, [`PortLock::release`] is called. Release is
/// tied to the thread that acquired, so the guard cannot be sent to another
/// thread.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct PortLockGuard<'a> {
    lock: &'a PortLock,
    acquisition: Acquisition,
    _not_send: PhantomData<*const ()>,
}

impl<'a> PortLockGuard<'a> {
    pub(crate) fn new(lock: &'a PortLock, acquisition: Acquisition) -> Self {
        Self {
            lock,
            acquisition,
            _not_send: PhantomData,
        }
    }

    pub fn acquisition(&self) -> Acquisition {
        self.acquisition
    }
}

impl Drop for PortLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
