//! Error types for port locking

use std::net::SocketAddr;
use thiserror::Error;

/// Error type for lock operations
#[derive(Error, Debug)]
pub enum PortLockError {
    /// The port is occupied by something that does not speak the lock protocol
    #[error("LOCK_PROTOCOL_MISMATCH: {addr} is in use by something that is not a port lock ({reason})")]
    ProtocolMismatch {
        /// Address of the lock port
        addr: SocketAddr,
        /// What the challenge observed
        reason: String,
    },

    /// I/O error during lock operation
    #[error("LOCK_IO_ERROR: I/O error during {operation} on {addr}: {source}")]
    Io {
        /// The underlying I/O error
        source: std::io::Error,
        /// Address of the lock port
        addr: SocketAddr,
        /// Operation that failed
        operation: String,
    },
}

impl PortLockError {
    pub(crate) fn io(source: std::io::Error, addr: SocketAddr, operation: &str) -> Self {
        PortLockError::Io {
            source,
            addr,
            operation: operation.to_string(),
        }
    }
}
