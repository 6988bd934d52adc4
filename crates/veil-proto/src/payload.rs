//! Inner payload encodings.
//!
//! Chat payloads and identity lists reuse the same building block: a
//! 2-byte big-endian length followed by that many bytes. Identity lists
//! are a run of such entries terminated by one zero-length entry; a
//! stamped chat is one such entry (the source identity) followed by the
//! chat body.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    errors::{ProtocolError, Result},
    message::{Message, MessageKind, MAX_PAYLOAD_SIZE},
    SessionId,
};

/// Why the server refused a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectReason {
    /// No live session with the requested ID.
    UnknownSession = 0,
    /// The session exists but the auth hash does not match.
    HashMismatch = 1,
}

impl RejectReason {
    /// Wire byte for this reason.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire byte. Unknown values collapse to `HashMismatch`, the
    /// conservative reading of a refusal.
    pub fn from_u8(value: u8) -> Self {
        if value == 0 {
            Self::UnknownSession
        } else {
            Self::HashMismatch
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownSession => write!(f, "unknown session"),
            Self::HashMismatch => write!(f, "incorrect credentials"),
        }
    }
}

impl Message {
    /// Join rejected; payload is the one reason byte.
    pub fn reject(reason: RejectReason) -> Self {
        Self::with_payload(MessageKind::Reject, Bytes::copy_from_slice(&[reason.to_u8()]))
    }

    /// Identity announcement or roster reply.
    ///
    /// # Errors
    ///
    /// `ProtocolError::PayloadTooLarge` if an identity or the whole list
    /// exceeds the length prefix.
    pub fn identities<I>(idents: &[I]) -> Result<Self>
    where
        I: AsRef<[u8]>,
    {
        Self::new(MessageKind::Ident, encode_identity_list(idents)?)
    }
}

/// Encode identities as `[2-byte len][bytes]` entries followed by one
/// zero-length terminator entry.
///
/// # Errors
///
/// `ProtocolError::PayloadTooLarge` if any single identity exceeds the
/// 2-byte entry length.
pub fn encode_identity_list<I>(idents: &[I]) -> Result<Bytes>
where
    I: AsRef<[u8]>,
{
    let mut out = BytesMut::new();
    for ident in idents {
        let ident = ident.as_ref();
        if ident.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: ident.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        out.put_u16(ident.len() as u16);
        out.put_slice(ident);
    }
    out.put_u16(0);
    Ok(out.freeze())
}

/// Parse an identity list.
///
/// Entries run until the zero-length terminator or the end of the buffer;
/// a missing terminator is tolerated, but an entry that would read past
/// the buffer is not. Zero-length identities cannot be encoded — the empty
/// entry is the terminator.
///
/// # Errors
///
/// `ProtocolError::MalformedIdentityList` if an entry length prefix is
/// truncated or declares more bytes than remain.
pub fn parse_identity_list(payload: &[u8]) -> Result<Vec<Bytes>> {
    let mut idents = Vec::new();
    let mut at = 0;
    while at < payload.len() {
        if at + 2 > payload.len() {
            return Err(ProtocolError::MalformedIdentityList);
        }
        let entry_len = u16::from_be_bytes([payload[at], payload[at + 1]]) as usize;
        at += 2;
        if entry_len == 0 {
            break;
        }
        let entry = payload
            .get(at..at + entry_len)
            .ok_or(ProtocolError::MalformedIdentityList)?;
        idents.push(Bytes::copy_from_slice(entry));
        at += entry_len;
    }
    Ok(idents)
}

/// Split a stamped chat payload into `(source identity, body)`.
///
/// # Errors
///
/// `ProtocolError::MalformedChat` if the payload is shorter than the
/// identity length prefix or the declared identity overruns it.
pub fn parse_chat(payload: &[u8]) -> Result<(Bytes, Bytes)> {
    if payload.len() < 2 {
        return Err(ProtocolError::MalformedChat);
    }
    let source_len = u16::from_be_bytes([payload[0], payload[1]]) as usize;
    let source = payload
        .get(2..2 + source_len)
        .ok_or(ProtocolError::MalformedChat)?;
    let body = &payload[2 + source_len..];
    Ok((Bytes::copy_from_slice(source), Bytes::copy_from_slice(body)))
}

/// Split a join-request payload into `(session ID, auth hash)`.
///
/// Returns `None` if the payload cannot hold the 2-byte session ID; the
/// caller decides what an unparseable handshake means for the connection.
pub fn parse_join(payload: &[u8]) -> Option<(SessionId, &[u8])> {
    if payload.len() < 2 {
        return None;
    }
    let session_id = u16::from_be_bytes([payload[0], payload[1]]);
    Some((session_id, &payload[2..]))
}

/// Extract the session ID from a session-created payload.
pub fn parse_created(payload: &[u8]) -> Option<SessionId> {
    if payload.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([payload[0], payload[1]]))
}
