//! Client protocol engine.
//!
//! One connection, two concurrent obligations: the outbound loop turns
//! console lines into encrypted chats, the inbound loop turns received
//! frames into console lines. They share only the writer half of the
//! socket and an active flag; when either loop exits, the other is
//! cancelled and the connection is shut down exactly once.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::{
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::Mutex,
};
use veil_proto::{
    parse_chat, parse_created, parse_identity_list, Message, MessageKind, ProtocolError,
    RejectReason,
};

use crate::{console::Console, credential::Credential, error::ClientError, SessionTarget};

/// Shared writer half of the connection.
type Outbound = Arc<Mutex<OwnedWriteHalf>>;

/// A client run: dial, handshake, converse until either side ends it.
pub struct Client {
    credential: Arc<Credential>,
}

impl Client {
    /// Build a client around an immutable credential.
    pub fn new(credential: Credential) -> Self {
        Self { credential: Arc::new(credential) }
    }

    /// Connect to `addr` and run until disconnect, quit, or error.
    ///
    /// # Errors
    ///
    /// Any [`ClientError`]; all of them are terminal for this run.
    pub async fn run(self, addr: &str, console: Arc<dyn Console>) -> Result<(), ClientError> {
        let mut stream = TcpStream::connect(addr).await.map_err(|source| {
            ClientError::Connect { addr: addr.to_string(), source }
        })?;

        self.handshake(&mut stream, console.as_ref()).await?;

        let (reader, writer) = stream.into_split();
        let outbound: Outbound = Arc::new(Mutex::new(writer));
        let active = Arc::new(AtomicBool::new(true));

        let inbound_loop = run_inbound(
            reader,
            Arc::clone(&outbound),
            Arc::clone(&console),
            Arc::clone(&self.credential),
        );
        let outbound_loop = run_outbound(
            Arc::clone(&outbound),
            Arc::clone(&console),
            Arc::clone(&self.credential),
        );

        // Whichever loop finishes first decides the outcome; dropping the
        // other cancels its pending read.
        let result = tokio::select! {
            inbound_result = inbound_loop => inbound_result,
            outbound_result = outbound_loop => outbound_result,
        };

        close(&outbound, &active).await;
        result
    }

    /// Run the create-or-join handshake for this credential's target.
    async fn handshake(
        &self,
        stream: &mut TcpStream,
        console: &dyn Console,
    ) -> Result<(), ClientError> {
        let hash = self.credential.auth_hash().as_bytes();
        match self.credential.target() {
            SessionTarget::Create => {
                Message::create(hash)?.write_to(stream).await?;
                let reply = expect_reply(stream).await?;
                if reply.kind() != MessageKind::Created {
                    return Err(ClientError::Handshake {
                        reason: format!("expected session announcement, got {:?}", reply.kind()),
                    });
                }
                let session_id = parse_created(reply.payload()).ok_or_else(|| {
                    ClientError::Handshake { reason: "session announcement too short".into() }
                })?;
                console.display_line(&format!("created session {session_id:04x}"));
            }
            SessionTarget::Join(session_id) => {
                Message::join(session_id, hash)?.write_to(stream).await?;
                let reply = expect_reply(stream).await?;
                match reply.kind() {
                    MessageKind::Accept => {
                        console.display_line(&format!("joined session {session_id:04x}"));
                    }
                    MessageKind::Reject => {
                        let reason = reply
                            .payload()
                            .first()
                            .copied()
                            .map_or(RejectReason::HashMismatch, RejectReason::from_u8);
                        return Err(ClientError::Rejected(reason));
                    }
                    other => {
                        return Err(ClientError::Handshake {
                            reason: format!("expected accept or reject, got {other:?}"),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

async fn expect_reply(stream: &mut TcpStream) -> Result<Message, ClientError> {
    Message::read_from(stream).await?.ok_or_else(|| ClientError::Handshake {
        reason: "server closed the connection during handshake".into(),
    })
}

/// Inbound loop: render received frames, answer identity requests.
async fn run_inbound(
    mut reader: OwnedReadHalf,
    outbound: Outbound,
    console: Arc<dyn Console>,
    credential: Arc<Credential>,
) -> Result<(), ClientError> {
    loop {
        let Some(message) = Message::read_from(&mut reader).await? else {
            // Server went away; an ordinary end of the conversation.
            return Ok(());
        };

        match message.kind() {
            MessageKind::Chat => {
                let (source, body) = match parse_chat(message.payload()) {
                    Ok(parts) => parts,
                    Err(e) => return abort_with(&outbound, e.into()).await,
                };
                console.display_line(&format!(
                    "{}: {}",
                    String::from_utf8_lossy(&source),
                    String::from_utf8_lossy(&body),
                ));
            }
            MessageKind::ChatEncrypted => {
                let (source, body) = match parse_chat(message.payload()) {
                    Ok(parts) => parts,
                    Err(e) => return abort_with(&outbound, e.into()).await,
                };
                // A failed open means tampering or a key mismatch; the
                // cipher stream cannot be resynchronized, so tear down.
                let plaintext = match credential.decrypt(&body) {
                    Ok(plaintext) => plaintext,
                    Err(e) => return abort_with(&outbound, e.into()).await,
                };
                console.display_line(&format!(
                    "{}: {}",
                    String::from_utf8_lossy(&source),
                    String::from_utf8_lossy(&plaintext),
                ));
            }
            MessageKind::IdentRequest => {
                if let Err(e) =
                    identity_exchange(&mut reader, &outbound, console.as_ref(), &credential).await
                {
                    return abort_with(&outbound, e).await;
                }
            }
            MessageKind::Abort => return Err(ClientError::PeerAbort),
            other => {
                let violation = ClientError::Violation {
                    reason: format!("unexpected {other:?} from the server"),
                };
                return abort_with(&outbound, violation).await;
            }
        }
    }
}

/// Announce our identity, then fetch and display the session roster.
async fn identity_exchange(
    reader: &mut OwnedReadHalf,
    outbound: &Outbound,
    console: &dyn Console,
    credential: &Credential,
) -> Result<(), ClientError> {
    send(outbound, &Message::identities(&[credential.identity()])?).await?;
    send(outbound, &Message::ident_request()).await?;

    let Some(reply) = Message::read_from(reader).await? else {
        return Err(ClientError::Violation {
            reason: "server disconnected during the roster exchange".into(),
        });
    };
    if reply.kind() != MessageKind::Ident {
        return Err(ClientError::Violation {
            reason: format!("expected a roster, got {:?}", reply.kind()),
        });
    }

    let roster = parse_identity_list(reply.payload())?;
    console.display_emphasis_line("=== active users ===");
    for identity in &roster {
        console.display_line(&format!("    {}", String::from_utf8_lossy(identity)));
    }
    console.display_emphasis_line("====================");
    Ok(())
}

/// Outbound loop: encrypt and send each console line.
async fn run_outbound(
    outbound: Outbound,
    console: Arc<dyn Console>,
    credential: Arc<Credential>,
) -> Result<(), ClientError> {
    loop {
        let line = match console.read_line(">> ", false).await {
            Ok(Some(line)) => line,
            // End-of-input: the user is done.
            Ok(None) => return Ok(()),
            Err(e) => return abort_with(&outbound, e.into()).await,
        };
        if line == "/quit" {
            return Ok(());
        }
        if line.is_empty() {
            continue;
        }

        let blob = credential.encrypt(line.as_bytes());
        let message = match Message::chat_encrypted(&blob) {
            Ok(message) => message,
            Err(e) => return abort_with(&outbound, e.into()).await,
        };
        send(&outbound, &message).await?;
    }
}

/// Best-effort abort signal to the peer, then surface the root cause.
///
/// The abort write failing never masks the error that triggered it.
async fn abort_with(outbound: &Outbound, cause: ClientError) -> Result<(), ClientError> {
    if let Err(e) = send(outbound, &Message::abort()).await {
        tracing::debug!(error = %e, "could not send abort signal");
    }
    Err(cause)
}

/// Idempotent connection close; the first caller wins.
async fn close(outbound: &Outbound, active: &AtomicBool) {
    if active.swap(false, Ordering::SeqCst) {
        use tokio::io::AsyncWriteExt;
        let mut writer = outbound.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(error = %e, "connection shutdown failed");
        }
    }
}

/// Write one frame through the shared writer handle.
async fn send(outbound: &Outbound, message: &Message) -> Result<(), ProtocolError> {
    let mut writer = outbound.lock().await;
    message.write_to(&mut *writer).await
}
