//! Common error types shared across crates.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Top-level service error type.
///
/// None of these ever reach a client as a body: the wire protocol only knows
/// a bare `500 Internal Server Error`. They exist for logging and for the
/// lifecycle API of the listeners.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The loopback socket could not be bound or put into listening state.
    #[error("failed to bind 127.0.0.1:{port}: {source}")]
    Bind {
        /// Port that was requested.
        port: u16,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// The TLS handshake with a client failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    /// The peer stayed silent for longer than the idle timeout.
    #[error("timed out after {0:?} waiting for the peer")]
    Timeout(Duration),

    /// Any other socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ServiceError {
    /// Returns `true` for failures caused by the peer rather than the service.
    ///
    /// Peer-side failures are logged at a lower level and never affect the
    /// listener that accepted the connection.
    pub fn is_peer_failure(&self) -> bool {
        matches!(
            self,
            ServiceError::Handshake(_) | ServiceError::Timeout(_) | ServiceError::Io(_)
        )
    }
}
