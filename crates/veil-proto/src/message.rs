//! Framed protocol messages.
//!
//! A [`Message`] is the unit of transport: a kind tag plus an opaque
//! payload. The payload's inner structure (identity lists, stamped chats,
//! join credentials) is handled by the payload helpers.
//!
//! # Invariants
//!
//! - The length prefix always equals the exact payload byte count;
//!   [`Message::new`] rejects anything the prefix cannot represent and
//!   [`Message::decode`] rejects any frame the buffer cannot satisfy.
//! - The kind tag is a closed set. Both ends of a deployment share this
//!   enum; the byte values are not a cross-version contract.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    errors::{ProtocolError, Result},
    SessionId,
};

/// Maximum payload size representable by the 16-bit length prefix.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Size of the frame header (length prefix + kind tag).
const HEADER_SIZE: usize = 3;

/// Kind tag of a protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Client asks to join an existing session (session ID + auth hash).
    Join = 0,
    /// Client asks to create a new session (auth hash).
    Create = 1,
    /// Server accepts a join request.
    Accept = 2,
    /// Server rejects a join request (one reason byte).
    Reject = 3,
    /// Server announces a freshly created session (session ID).
    Created = 4,
    /// Either side requests an identity announcement or roster.
    IdentRequest = 5,
    /// Identity announcement or roster (identity-list encoding).
    Ident = 6,
    /// Plaintext chat.
    Chat = 7,
    /// End-to-end encrypted chat.
    ChatEncrypted = 8,
    /// Abort signal; the peer is tearing the connection down.
    Abort = 9,
}

impl MessageKind {
    /// Wire byte for this kind.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire byte. `None` for tags outside the closed set.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Join),
            1 => Some(Self::Create),
            2 => Some(Self::Accept),
            3 => Some(Self::Reject),
            4 => Some(Self::Created),
            5 => Some(Self::IdentRequest),
            6 => Some(Self::Ident),
            7 => Some(Self::Chat),
            8 => Some(Self::ChatEncrypted),
            9 => Some(Self::Abort),
            _ => None,
        }
    }
}

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    payload: Bytes,
}

impl Message {
    /// Create a message, validating the payload against the length prefix.
    ///
    /// # Errors
    ///
    /// `ProtocolError::PayloadTooLarge` if the payload exceeds
    /// [`MAX_PAYLOAD_SIZE`].
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self { kind, payload })
    }

    /// Constructor for payloads known to fit the length prefix.
    pub(crate) fn with_payload(kind: MessageKind, payload: Bytes) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD_SIZE);
        Self { kind, payload }
    }

    /// Message kind tag.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Join request: 2-byte session ID followed by the auth hash.
    pub fn join(session_id: SessionId, auth_hash: &[u8]) -> Result<Self> {
        let mut payload = BytesMut::with_capacity(2 + auth_hash.len());
        payload.put_u16(session_id);
        payload.put_slice(auth_hash);
        Self::new(MessageKind::Join, payload.freeze())
    }

    /// Create request carrying the auth hash of the new session.
    pub fn create(auth_hash: &[u8]) -> Result<Self> {
        Self::new(MessageKind::Create, Bytes::copy_from_slice(auth_hash))
    }

    /// Join accepted; empty payload.
    pub fn accept() -> Self {
        Self::with_payload(MessageKind::Accept, Bytes::new())
    }

    /// Session created; payload is the 2-byte session ID.
    pub fn created(session_id: SessionId) -> Self {
        let mut payload = BytesMut::with_capacity(2);
        payload.put_u16(session_id);
        Self::with_payload(MessageKind::Created, payload.freeze())
    }

    /// Identity or roster request; empty payload.
    pub fn ident_request() -> Self {
        Self::with_payload(MessageKind::IdentRequest, Bytes::new())
    }

    /// Plaintext chat with a raw (unstamped) body.
    pub fn chat(body: &[u8]) -> Result<Self> {
        Self::new(MessageKind::Chat, Bytes::copy_from_slice(body))
    }

    /// Encrypted chat carrying a raw (unstamped) AEAD blob.
    pub fn chat_encrypted(blob: &[u8]) -> Result<Self> {
        Self::new(MessageKind::ChatEncrypted, Bytes::copy_from_slice(blob))
    }

    /// Abort signal; empty payload.
    pub fn abort() -> Self {
        Self::with_payload(MessageKind::Abort, Bytes::new())
    }

    /// Stamp a chat payload with its source identity.
    ///
    /// Rewrites the payload to `[2-byte len][source][original payload]`,
    /// keeping the kind. The relay uses this to attribute an inbound chat
    /// to its sender before broadcasting.
    ///
    /// # Errors
    ///
    /// `ProtocolError::PayloadTooLarge` if the stamped payload no longer
    /// fits the length prefix.
    pub fn prepend_source(&self, source: &[u8]) -> Result<Self> {
        if source.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: source.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let mut payload = BytesMut::with_capacity(2 + source.len() + self.payload.len());
        payload.put_u16(source.len() as u16);
        payload.put_slice(source);
        payload.put_slice(&self.payload);
        Self::new(self.kind, payload.freeze())
    }

    /// Encode into wire bytes: length prefix, kind tag, payload.
    pub fn encode(&self) -> Bytes {
        let mut wire = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        wire.put_u16(self.payload.len() as u16);
        wire.put_u8(self.kind.to_u8());
        wire.put_slice(&self.payload);
        wire.freeze()
    }

    /// Decode one frame from a buffer.
    ///
    /// The buffer must contain the complete frame; trailing bytes are
    /// ignored.
    ///
    /// # Errors
    ///
    /// `ProtocolError::Framing` if the buffer is shorter than the header
    /// plus the declared payload length, or if the kind tag is outside the
    /// closed set.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::Framing { reason: "truncated frame header" });
        }
        let length = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        let kind = MessageKind::from_u8(buf[2])
            .ok_or(ProtocolError::Framing { reason: "unknown message kind" })?;
        let body = buf
            .get(HEADER_SIZE..HEADER_SIZE + length)
            .ok_or(ProtocolError::Framing { reason: "truncated payload" })?;
        Ok(Self::with_payload(kind, Bytes::copy_from_slice(body)))
    }

    /// Read one frame from an async stream.
    ///
    /// Returns `Ok(None)` on a clean end-of-stream before the first length
    /// byte — an ordinary disconnect. End-of-stream anywhere inside a frame
    /// is a framing error.
    ///
    /// # Errors
    ///
    /// `ProtocolError::Framing` on a short read mid-frame or an unknown
    /// kind tag, `ProtocolError::Io` on transport failure.
    pub async fn read_from<R>(reader: &mut R) -> Result<Option<Self>>
    where
        R: AsyncRead + Unpin,
    {
        let mut length_buf = [0u8; 2];
        match reader.read(&mut length_buf[..1]).await {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) => return Err(e.into()),
        }
        reader
            .read_exact(&mut length_buf[1..])
            .await
            .map_err(|e| short_read(e, "length prefix"))?;
        let length = u16::from_be_bytes(length_buf) as usize;

        let mut kind_buf = [0u8; 1];
        reader
            .read_exact(&mut kind_buf)
            .await
            .map_err(|e| short_read(e, "kind tag"))?;
        let kind = MessageKind::from_u8(kind_buf[0])
            .ok_or(ProtocolError::Framing { reason: "unknown message kind" })?;

        let mut payload = vec![0u8; length];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| short_read(e, "payload body"))?;

        Ok(Some(Self::with_payload(kind, Bytes::from(payload))))
    }

    /// Write this frame to an async stream and flush it.
    ///
    /// # Errors
    ///
    /// `ProtocolError::Io` on transport failure.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.encode()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Classify a read error: end-of-stream mid-frame is a framing error,
/// anything else is transport failure.
fn short_read(err: std::io::Error, reason: &'static str) -> ProtocolError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtocolError::Framing { reason }
    } else {
        ProtocolError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_bytes_round_trip() {
        for value in 0..=9u8 {
            let kind = MessageKind::from_u8(value).unwrap();
            assert_eq!(kind.to_u8(), value);
        }
        assert!(MessageKind::from_u8(10).is_none());
        assert!(MessageKind::from_u8(255).is_none());
    }

    #[test]
    fn encode_lays_out_header() {
        let msg = Message::chat(b"hi").unwrap();
        let wire = msg.encode();
        assert_eq!(&wire[..], &[0, 2, MessageKind::Chat.to_u8(), b'h', b'i']);
    }

    #[test]
    fn oversized_payload_rejected() {
        let body = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let err = Message::new(MessageKind::Chat, body).unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadTooLarge { .. }));
    }

    #[test]
    fn prepend_source_overflow_rejected() {
        let body = vec![0u8; MAX_PAYLOAD_SIZE - 1];
        let msg = Message::new(MessageKind::Chat, body).unwrap();
        let err = msg.prepend_source(b"alice").unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadTooLarge { .. }));
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        // Header claims 4 payload bytes, buffer carries 2.
        let wire = [0u8, 4, MessageKind::Chat.to_u8(), b'h', b'i'];
        let err = Message::decode(&wire).unwrap_err();
        assert!(matches!(err, ProtocolError::Framing { .. }));
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let wire = [0u8, 0, 200];
        let err = Message::decode(&wire).unwrap_err();
        assert!(matches!(err, ProtocolError::Framing { .. }));
    }

    #[tokio::test]
    async fn read_from_clean_eof_is_disconnect() {
        let mut stream: &[u8] = &[];
        let read = Message::read_from(&mut stream).await.unwrap();
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn read_from_mid_frame_eof_is_framing_error() {
        // Length prefix present, kind and payload missing.
        let mut stream: &[u8] = &[0, 5];
        let err = Message::read_from(&mut stream).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Framing { reason: "kind tag" }));
    }

    #[tokio::test]
    async fn read_from_round_trips_over_stream() {
        let msg = Message::join(0xBEEF, &[7u8; 32]).unwrap();
        let wire = msg.encode();
        let mut stream: &[u8] = &wire;
        let read = Message::read_from(&mut stream).await.unwrap().unwrap();
        assert_eq!(read, msg);
        // Stream is drained; the next read reports a clean disconnect.
        assert!(Message::read_from(&mut stream).await.unwrap().is_none());
    }
}
