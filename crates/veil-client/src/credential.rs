//! Per-run client credential.
//!
//! Built once from the user-supplied passphrase, identity and session
//! target; immutable afterwards. The derived key never leaves this
//! struct — the server only ever sees [`Credential::auth_hash`].

use veil_crypto::{auth_hash, derive_key, AuthHash, CryptoError, SessionKey};
use veil_proto::SessionId;

/// Whether this run creates a session or joins an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTarget {
    /// Ask the server for a fresh session.
    Create,
    /// Join the session with this ID.
    Join(SessionId),
}

/// Everything the client engine needs to authenticate and converse.
pub struct Credential {
    key: SessionKey,
    auth_hash: AuthHash,
    identity: String,
    target: SessionTarget,
}

impl Credential {
    /// Credential for creating a new session.
    pub fn create(passphrase: &str, identity: impl Into<String>) -> Self {
        Self::build(passphrase, identity, SessionTarget::Create)
    }

    /// Credential for joining session `session_id`.
    pub fn join(session_id: SessionId, passphrase: &str, identity: impl Into<String>) -> Self {
        Self::build(passphrase, identity, SessionTarget::Join(session_id))
    }

    fn build(passphrase: &str, identity: impl Into<String>, target: SessionTarget) -> Self {
        let key = derive_key(passphrase);
        let auth_hash = auth_hash(&key);
        Self { key, auth_hash, identity: identity.into(), target }
    }

    /// Display identity announced to the session.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Hash sent to the server in place of the key.
    pub fn auth_hash(&self) -> &AuthHash {
        &self.auth_hash
    }

    /// Create-or-join mode for this run.
    pub fn target(&self) -> SessionTarget {
        self.target
    }

    /// Seal an outbound chat body under the session key.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        veil_crypto::encrypt(&self.key, plaintext)
    }

    /// Open an inbound encrypted chat body.
    ///
    /// # Errors
    ///
    /// `CryptoError::AuthenticationFailure` on tampering or a key
    /// mismatch between session members.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        veil_crypto::decrypt(&self.key, blob)
    }
}
