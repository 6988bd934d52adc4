//! Crypto error types.

use thiserror::Error;

/// Errors from sealing or opening chat payloads.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD open failed: the ciphertext was tampered with or sealed under
    /// a different key. This is the only integrity check on encrypted
    /// chat bodies, and it is unrecoverable for the stream it occurs on.
    #[error("authentication failure")]
    AuthenticationFailure,

    /// The blob is shorter than the prepended nonce.
    #[error("ciphertext too short: {len} bytes, need at least {min}")]
    TruncatedCiphertext {
        /// Actual blob length
        len: usize,
        /// Minimum length (the nonce alone)
        min: usize,
    },

    /// An auth hash had the wrong length.
    #[error("invalid auth hash length: expected {expected}, got {actual}")]
    InvalidHashLength {
        /// Expected digest size
        expected: usize,
        /// Actual byte count received
        actual: usize,
    },
}
