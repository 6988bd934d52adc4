//! Client error types.

use thiserror::Error;
use veil_crypto::CryptoError;
use veil_proto::{ProtocolError, RejectReason};

/// Errors that terminate a client run.
///
/// Everything here is fatal for the connection it occurred on; there is
/// no retry anywhere in the protocol.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not reach the server.
    #[error("could not connect to {addr}: {source}")]
    Connect {
        /// Address we dialed
        addr: String,
        /// Underlying connect failure
        #[source]
        source: std::io::Error,
    },

    /// The server's handshake reply was not what the mode calls for.
    #[error("handshake failed: {reason}")]
    Handshake {
        /// What went wrong
        reason: String,
    },

    /// The server refused the join request.
    #[error("join rejected: {0}")]
    Rejected(RejectReason),

    /// The peer sent a message the protocol does not allow here.
    #[error("protocol violation: {reason}")]
    Violation {
        /// What was wrong with the message
        reason: String,
    },

    /// The peer signalled an abort.
    #[error("peer sent an abort signal")]
    PeerAbort,

    /// Framing or transport failure underneath the engine.
    #[error(transparent)]
    Wire(#[from] ProtocolError),

    /// A received ciphertext failed authentication. The cipher stream
    /// cannot be resynchronized, so the connection is torn down.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Console input failure.
    #[error("console error: {0}")]
    Console(#[from] std::io::Error),
}
