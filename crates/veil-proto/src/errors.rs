//! Codec error types.

use thiserror::Error;

/// Convenience alias for codec results.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding wire frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload exceeds the 16-bit length prefix.
    #[error("payload too large: {size} bytes exceeds {max}")]
    PayloadTooLarge {
        /// Actual payload size in bytes
        size: usize,
        /// Maximum representable payload size
        max: usize,
    },

    /// The stream ended or came up short inside a frame.
    #[error("framing error: {reason}")]
    Framing {
        /// Which part of the frame could not be read
        reason: &'static str,
    },

    /// An identity-list entry declares more bytes than the buffer holds,
    /// or an entry length prefix is itself truncated.
    #[error("malformed identity list")]
    MalformedIdentityList,

    /// A chat payload declares a source identity longer than the payload.
    #[error("malformed chat payload")]
    MalformedChat,

    /// Transport failure underneath the codec.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
