//! Server error types.

use thiserror::Error;

/// Errors that are fatal to the server process.
///
/// Everything that happens after the listener is up is scoped to a single
/// connection and reported rather than propagated; only setup failures
/// surface here.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error (unparseable bind address).
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport error (cannot bind the listener, listener I/O failure).
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}
