//! Wire codec for the veil relay protocol.
//!
//! Every message on the wire is a single frame:
//!
//! ```text
//! [length: u16 BE] + [kind: u8] + [payload: length bytes]
//! ```
//!
//! The length counts payload bytes only, so a frame is at most
//! `2 + 1 + 65535` bytes. Frames carry either control traffic (session
//! setup, identity exchange) or chat payloads, which have their own inner
//! encoding (see [`parse_chat`] and [`parse_identity_list`]).
//!
//! The codec is transport-agnostic: [`Message::decode`] works on a byte
//! buffer, [`Message::read_from`] drives any [`tokio::io::AsyncRead`].
//! A clean end-of-stream before the first length byte is a normal
//! disconnect (`Ok(None)`), not an error; running dry mid-frame is a
//! framing error.

mod errors;
mod message;
mod payload;

pub use errors::{ProtocolError, Result};
pub use message::{Message, MessageKind, MAX_PAYLOAD_SIZE};
pub use payload::{
    encode_identity_list, parse_chat, parse_created, parse_identity_list, parse_join, RejectReason,
};

/// Session identifiers are drawn from the 16-bit space.
pub type SessionId = u16;

/// Identity the relay stamps onto chats it synthesizes itself.
pub const SERVER_IDENTITY: &[u8] = b"server";
