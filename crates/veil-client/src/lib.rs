//! Interactive client for the veil relay.
//!
//! A run is built from an immutable [`Credential`] (derived key, auth
//! hash, identity, create-or-join target) and a [`Console`] capability
//! for line I/O. [`Client::run`] dials the server, performs the
//! handshake, then converses: every submitted line is sealed under the
//! session key and relayed, every received chat is rendered with its
//! source identity.
//!
//! The passphrase-derived key never crosses the wire; the server sees
//! only its SHA-256 hash.

mod client;
mod console;
mod credential;
mod error;

pub use client::Client;
pub use console::{Console, TerminalConsole};
pub use credential::{Credential, SessionTarget};
pub use error::ClientError;
