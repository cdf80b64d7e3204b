//! Server error types.

use thiserror::Error;

use crate::bus::BusError;

/// Errors that can occur in the server runtime.
///
/// Only startup failures (bad configuration, bind failure, unreachable bus)
/// are fatal. Per-connection and per-message failures are handled inside the
/// relay and never surface here.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration error (invalid bind address, invalid default room, bus
    /// backend not compiled in).
    ///
    /// Fatal - fix configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error (bind failure, accept failure, I/O error).
    ///
    /// May be transient (accept errors) or fatal (bind address in use).
    #[error("transport error: {0}")]
    Transport(String),

    /// Bus error at startup (broker unreachable).
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
