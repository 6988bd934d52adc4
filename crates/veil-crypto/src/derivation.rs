//! Passphrase stretching and the membership auth hash.

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Size of the symmetric session key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the SHA-256 auth hash in bytes.
pub const AUTH_HASH_SIZE: usize = 32;

/// The 32-byte symmetric key shared by all members of a session.
///
/// Derived deterministically from the passphrase and zeroized on drop.
/// Never serialized; the only key-derived value that crosses the wire is
/// the [`AuthHash`].
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// SHA-256 of a session key.
///
/// This is the only form of the key the server ever observes: enough to
/// check that two clients stretched the same passphrase, useless for
/// opening their payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthHash([u8; AUTH_HASH_SIZE]);

impl AuthHash {
    /// Raw digest bytes, as sent on the wire.
    pub fn as_bytes(&self) -> &[u8; AUTH_HASH_SIZE] {
        &self.0
    }
}

impl From<[u8; AUTH_HASH_SIZE]> for AuthHash {
    fn from(bytes: [u8; AUTH_HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for AuthHash {
    type Error = CryptoError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let digest: [u8; AUTH_HASH_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::InvalidHashLength {
                expected: AUTH_HASH_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self(digest))
    }
}

/// Stretch a passphrase into a 32-byte session key.
///
/// The passphrase is repeated until it covers [`KEY_SIZE`] bytes and then
/// truncated, so any two clients derive the identical key from the same
/// passphrase with no interaction. An empty passphrase yields the all-zero
/// key — a weak default retained for compatibility with existing
/// deployments, not a recommendation.
pub fn derive_key(passphrase: &str) -> SessionKey {
    let mut key = [0u8; KEY_SIZE];
    if passphrase.is_empty() {
        return SessionKey(key);
    }
    let mut stretched = Vec::with_capacity(KEY_SIZE + passphrase.len());
    while stretched.len() < KEY_SIZE {
        stretched.extend_from_slice(passphrase.as_bytes());
    }
    key.copy_from_slice(&stretched[..KEY_SIZE]);
    stretched.zeroize();
    SessionKey(key)
}

/// SHA-256 the session key into the membership auth hash.
pub fn auth_hash(key: &SessionKey) -> AuthHash {
    let digest = Sha256::digest(key.as_bytes());
    AuthHash(digest.into())
}
