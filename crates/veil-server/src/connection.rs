//! Per-connection protocol state machine.
//!
//! Each accepted socket is driven by one task through the phases
//! `AwaitingHandshake → AwaitingIdentity → Relaying → Closed`. The phases
//! are sequential reads on the socket, so the state machine is simply the
//! call sequence in [`serve`].
//!
//! Every failure here — protocol violation, framing error, rejected
//! join — terminates this connection only. The membership removal and
//! departure announcement run on every exit path once the connection has
//! attached to a session.

use std::sync::Arc;

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::Mutex,
};
use veil_crypto::AuthHash;
use veil_proto::{
    parse_identity_list, parse_join, Message, MessageKind, ProtocolError, RejectReason, SessionId,
    SERVER_IDENTITY,
};

use crate::registry::{ConnId, JoinVerdict, Outbound, RegistryError, SessionRegistry};

/// Why a connection terminated ahead of a clean disconnect.
#[derive(Debug, Error)]
enum ConnectionError {
    /// The peer sent a message the current state does not allow.
    #[error("protocol violation: {reason}")]
    Violation {
        /// What was wrong with the message
        reason: String,
    },

    /// Framing or transport failure underneath the engine.
    #[error(transparent)]
    Wire(#[from] ProtocolError),

    /// Join refused; the rejection was already sent to the peer.
    #[error("join rejected: {0}")]
    Rejected(RejectReason),

    /// Registry refusal that terminates the handshake (capacity bound).
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Drive one accepted connection through its whole lifecycle.
///
/// Consumes the socket; returns once the connection is closed. All errors
/// are reported here — nothing propagates to the accept loop.
pub(crate) async fn serve<S>(stream: S, peer: String, registry: Arc<SessionRegistry>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    tracing::info!(%peer, "connected");

    let (mut reader, writer) = tokio::io::split(stream);
    let outbound: Outbound = Arc::new(Mutex::new(Box::new(writer)));
    let conn = registry.issue_handle();

    match run(&mut reader, &outbound, conn, &peer, &registry).await {
        Ok(()) => {}
        Err(ConnectionError::Rejected(reason)) => {
            tracing::info!(%peer, %reason, "join rejected");
        }
        Err(e) => {
            tracing::warn!(%peer, error = %e, "connection terminated");
        }
    }

    tracing::info!(%peer, "disconnected");
}

async fn run<R>(
    reader: &mut R,
    outbound: &Outbound,
    conn: ConnId,
    peer: &str,
    registry: &SessionRegistry,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    // AwaitingHandshake
    let Some(session_id) = await_handshake(reader, outbound, peer, registry).await? else {
        return Ok(());
    };
    tracing::info!(%peer, session = format_args!("{session_id:04x}"), "attached to session");

    // AwaitingIdentity
    let identity = await_identity(reader, outbound, session_id, conn, registry).await?;
    tracing::info!(%peer, %identity, "identified");

    // Relaying; departure runs regardless of how the loop ends.
    let relayed = relay(reader, outbound, session_id, &identity, registry).await;
    depart(registry, session_id, conn, &identity).await;
    relayed
}

/// First message must be a join or create request.
///
/// Returns the session this connection attached to, or `None` on a clean
/// disconnect before the handshake.
async fn await_handshake<R>(
    reader: &mut R,
    outbound: &Outbound,
    peer: &str,
    registry: &SessionRegistry,
) -> Result<Option<SessionId>, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let Some(request) = Message::read_from(reader).await? else {
        return Ok(None);
    };

    match request.kind() {
        MessageKind::Join => {
            let Some((session_id, hash_bytes)) = parse_join(request.payload()) else {
                return Err(ConnectionError::Violation {
                    reason: "join request too short for a session ID".into(),
                });
            };
            let auth_hash =
                AuthHash::try_from(hash_bytes).map_err(|e| ConnectionError::Violation {
                    reason: format!("join request: {e}"),
                })?;

            match registry.verify_join(session_id, &auth_hash).await {
                JoinVerdict::Accepted => {
                    send(outbound, &Message::accept()).await?;
                    tracing::info!(%peer, "accepted to session");
                    Ok(Some(session_id))
                }
                JoinVerdict::Rejected(reason) => {
                    // Best-effort: the rejection itself failing to send
                    // does not mask the rejection.
                    if let Err(e) = send(outbound, &Message::reject(reason)).await {
                        tracing::warn!(%peer, error = %e, "failed to send rejection");
                    }
                    Err(ConnectionError::Rejected(reason))
                }
            }
        }
        MessageKind::Create => {
            let auth_hash =
                AuthHash::try_from(request.payload()).map_err(|e| ConnectionError::Violation {
                    reason: format!("create request: {e}"),
                })?;

            // CapacityExceeded closes the connection with no dedicated
            // rejection message on this path.
            let session_id = registry.create_session(auth_hash).await?;
            send(outbound, &Message::created(session_id)).await?;
            tracing::info!(%peer, session = format_args!("{session_id:04x}"), "created session");
            Ok(Some(session_id))
        }
        other => Err(ConnectionError::Violation {
            reason: format!("unexpected first message kind {other:?}"),
        }),
    }
}

/// Request the peer's identity and register it as a session member.
///
/// Expects exactly one identity in the reply. The arrival announcement is
/// broadcast before the new member is registered, so it reaches only the
/// members already present.
async fn await_identity<R>(
    reader: &mut R,
    outbound: &Outbound,
    session_id: SessionId,
    conn: ConnId,
    registry: &SessionRegistry,
) -> Result<String, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    send(outbound, &Message::ident_request()).await?;

    let Some(reply) = Message::read_from(reader).await? else {
        return Err(ConnectionError::Violation {
            reason: "peer disconnected during identity exchange".into(),
        });
    };
    if reply.kind() != MessageKind::Ident {
        return Err(ConnectionError::Violation {
            reason: format!("expected identity announcement, got {:?}", reply.kind()),
        });
    }

    let idents = parse_identity_list(reply.payload())?;
    if idents.len() != 1 {
        return Err(ConnectionError::Violation {
            reason: format!("expected exactly one identity, got {}", idents.len()),
        });
    }
    let identity = String::from_utf8_lossy(&idents[0]).into_owned();

    announce(registry, session_id, &identity, "has entered the session").await;

    if let Err(e) = registry.add_member(session_id, conn, identity.clone(), outbound.clone()).await
    {
        tracing::warn!(%identity, error = %e, "could not register member");
    }

    Ok(identity)
}

/// Relay loop: roster requests, chat fan-out, peer aborts.
async fn relay<R>(
    reader: &mut R,
    outbound: &Outbound,
    session_id: SessionId,
    identity: &str,
    registry: &SessionRegistry,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    loop {
        let Some(message) = Message::read_from(reader).await? else {
            // Ordinary disconnect.
            return Ok(());
        };

        match message.kind() {
            MessageKind::IdentRequest => match registry.identities(session_id).await {
                Ok(idents) => {
                    let roster = Message::identities(&idents)?;
                    send(outbound, &roster).await?;
                }
                Err(e) => tracing::warn!(%identity, error = %e, "roster request failed"),
            },
            MessageKind::Chat | MessageKind::ChatEncrypted => {
                let stamped = message.prepend_source(identity.as_bytes())?;
                if let Err(e) = registry.broadcast(session_id, &stamped, Some(identity)).await {
                    tracing::warn!(%identity, error = %e, "chat broadcast failed");
                }
            }
            MessageKind::Abort => {
                tracing::info!(%identity, "peer aborted");
                return Ok(());
            }
            other => {
                return Err(ConnectionError::Violation {
                    reason: format!("unexpected {other:?} while relaying"),
                });
            }
        }
    }
}

/// Deregister the member and announce the departure.
async fn depart(registry: &SessionRegistry, session_id: SessionId, conn: ConnId, identity: &str) {
    if let Err(e) = registry.remove_member(session_id, conn).await {
        tracing::warn!(%identity, error = %e, "could not deregister member");
    }
    announce(registry, session_id, identity, "has left the session").await;
}

/// Broadcast a server-sourced chat about `identity`, excluding it.
async fn announce(registry: &SessionRegistry, session_id: SessionId, identity: &str, event: &str) {
    let line = format!("{identity} {event}");
    let announcement =
        Message::chat(line.as_bytes()).and_then(|m| m.prepend_source(SERVER_IDENTITY));
    match announcement {
        Ok(message) => {
            if let Err(e) = registry.broadcast(session_id, &message, Some(identity)).await {
                tracing::warn!(%identity, error = %e, "announcement broadcast failed");
            }
        }
        Err(e) => tracing::warn!(%identity, error = %e, "could not build announcement"),
    }
}

/// Write one frame through the shared writer handle.
async fn send(outbound: &Outbound, message: &Message) -> Result<(), ProtocolError> {
    let mut writer = outbound.lock().await;
    message.write_to(&mut *writer).await
}
