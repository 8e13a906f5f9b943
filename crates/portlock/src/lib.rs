//! Cross-process mutual exclusion arbitrated by a loopback TCP port
//!
//! Whoever binds the port holds the lock. See [`lock`] for the protocol
//! between the holder and the processes waiting on it.

// Core modules
pub mod config;
pub mod lock;
pub mod protocol;

// Re-export commonly used types
pub use config::{ConfigError, PortLockConfig, VanishedPolicy};
pub use lock::{Acquisition, Phase, PortLock, PortLockError, PortLockGuard};
