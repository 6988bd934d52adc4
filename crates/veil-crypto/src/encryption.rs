//! Chat payload encryption using ChaCha20-Poly1305.
//!
//! Each call to [`encrypt`] draws a fresh random 12-byte nonce and
//! prepends it to the sealed output, so a blob is self-contained:
//!
//! ```text
//! [nonce: 12 bytes][ciphertext + 16-byte Poly1305 tag]
//! ```
//!
//! Associated data is empty; the tag covers the chat body alone.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::{rngs::OsRng, RngCore};

use crate::{derivation::SessionKey, error::CryptoError};

/// Size of the nonce prepended to every sealed blob.
pub const NONCE_SIZE: usize = 12;

/// Seal a plaintext under the session key.
///
/// Returns `nonce ‖ ciphertext`. Every call uses a fresh nonce from the
/// operating system CSPRNG, so sealing the same plaintext twice yields
/// different blobs.
pub fn encrypt(key: &SessionKey, plaintext: &[u8]) -> Vec<u8> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let Ok(sealed) = cipher.encrypt(Nonce::from_slice(&nonce), plaintext) else {
        unreachable!("ChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    let mut blob = Vec::with_capacity(NONCE_SIZE + sealed.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&sealed);
    blob
}

/// Open a sealed blob produced by [`encrypt`].
///
/// # Errors
///
/// - `CryptoError::TruncatedCiphertext` if the blob cannot hold a nonce
/// - `CryptoError::AuthenticationFailure` on tampering or key mismatch
pub fn decrypt(key: &SessionKey, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < NONCE_SIZE {
        return Err(CryptoError::TruncatedCiphertext { len: blob.len(), min: NONCE_SIZE });
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);

    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailure)
}
