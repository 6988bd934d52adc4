//! Key material and payload encryption for the veil relay.
//!
//! The trust model splits one passphrase into two artifacts:
//!
//! ```text
//! passphrase
//!      │
//!      ▼
//! stretch → SessionKey (32 bytes, never leaves the client)
//!      │
//!      ▼
//! SHA-256 → AuthHash (sent to the server in place of the key)
//! ```
//!
//! The server stores and compares only the [`AuthHash`]; two clients that
//! present the same hash are assumed to hold the same key. Chat payloads
//! are sealed client-side with ChaCha20-Poly1305 under the [`SessionKey`],
//! so the relay forwards ciphertext it cannot open.
//!
//! Key derivation is deliberately deterministic and salt-free: a joiner
//! must reproduce the creator's key from the passphrase alone, with no
//! exchange. That also makes the scheme only as strong as the passphrase;
//! see [`derive_key`] for the weak-default caveat.

mod derivation;
mod encryption;
mod error;

pub use derivation::{auth_hash, derive_key, AuthHash, SessionKey, AUTH_HASH_SIZE, KEY_SIZE};
pub use encryption::{decrypt, encrypt, NONCE_SIZE};
pub use error::CryptoError;
