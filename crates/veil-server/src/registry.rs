//! Session registry: live sessions, membership, and broadcast.
//!
//! The registry is the only concurrently mutated structure in the server.
//! One `tokio::sync::Mutex` guards the whole session table; every
//! mutation and every broadcast iteration runs under it, so membership
//! changes can never race with an in-flight fan-out. Connections are
//! identified by an opaque [`ConnId`] token minted per accepted socket —
//! membership is decoupled from transport-layer object identity.
//!
//! The registry compares auth hashes to admit joiners; it never sees a
//! key and never decrypts a payload it relays.
//!
//! Sessions are never reaped: an empty session stays joinable until the
//! process exits. The capacity bound below keeps the table from eating
//! the whole ID space.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
};

use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tokio::{io::AsyncWrite, sync::Mutex};
use veil_crypto::AuthHash;
use veil_proto::{Message, RejectReason, SessionId};

/// Maximum number of live sessions: two-thirds of the 16-bit ID space.
///
/// Beyond this the random-ID search gets expensive and the table is close
/// to exhausting the ID space, so session creation is refused outright.
pub const SESSION_CAPACITY: usize = (u16::MAX as usize / 3) * 2;

/// Opaque handle identifying one accepted connection.
///
/// Minted by [`SessionRegistry::issue_handle`]; the token is the
/// membership key, never the socket itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

/// Shared writer half of a member's socket.
///
/// Broadcast fan-out and the member's own protocol replies both go
/// through this handle; the mutex serializes them so frames never
/// interleave mid-message.
pub type Outbound = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The session table is past its capacity bound.
    #[error("session table full: {live} live sessions")]
    CapacityExceeded {
        /// Live session count at the time of the refusal
        live: usize,
    },

    /// No live session carries this ID. Non-fatal: callers report it and
    /// move on.
    #[error("unknown session {session_id:#06x}")]
    UnknownSession {
        /// The session ID that was not found
        session_id: SessionId,
    },
}

/// Outcome of a join verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinVerdict {
    /// Session exists and the auth hash matches.
    Accepted,
    /// Session missing or hash mismatch; carries the wire reason.
    Rejected(RejectReason),
}

/// One member of a session.
struct Member {
    identity: String,
    outbound: Outbound,
}

/// A live session: its immutable auth hash and current members.
struct Session {
    auth_hash: AuthHash,
    members: HashMap<ConnId, Member>,
}

impl Session {
    fn new(auth_hash: AuthHash) -> Self {
        Self { auth_hash, members: HashMap::new() }
    }
}

/// Concurrency-safe table of live sessions.
///
/// Constructed once at server startup and handed to the accept loop;
/// there is no global instance.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Session>>,
    next_handle: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { sessions: Mutex::new(HashMap::new()), next_handle: AtomicU64::new(0) }
    }

    /// Mint a fresh connection handle.
    pub fn issue_handle(&self) -> ConnId {
        ConnId(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a new session guarded by `auth_hash`.
    ///
    /// Draws uniformly random 16-bit IDs from the OS CSPRNG until an
    /// unused one turns up. IDs of live sessions are never reused.
    ///
    /// # Errors
    ///
    /// `RegistryError::CapacityExceeded` once the live-session count
    /// exceeds [`SESSION_CAPACITY`].
    pub async fn create_session(&self, auth_hash: AuthHash) -> Result<SessionId, RegistryError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.len() > SESSION_CAPACITY {
            return Err(RegistryError::CapacityExceeded { live: sessions.len() });
        }
        let mut id_bytes = [0u8; 2];
        loop {
            OsRng.fill_bytes(&mut id_bytes);
            let session_id = u16::from_be_bytes(id_bytes);
            if !sessions.contains_key(&session_id) {
                sessions.insert(session_id, Session::new(auth_hash));
                return Ok(session_id);
            }
        }
    }

    /// Check whether `auth_hash` admits a joiner to `session_id`.
    ///
    /// Read-only; the connection is admitted as a member only by a later
    /// [`SessionRegistry::add_member`].
    pub async fn verify_join(&self, session_id: SessionId, auth_hash: &AuthHash) -> JoinVerdict {
        let sessions = self.sessions.lock().await;
        match sessions.get(&session_id) {
            None => JoinVerdict::Rejected(RejectReason::UnknownSession),
            Some(session) if session.auth_hash == *auth_hash => JoinVerdict::Accepted,
            Some(_) => JoinVerdict::Rejected(RejectReason::HashMismatch),
        }
    }

    /// Register `conn` as a member of `session_id`.
    ///
    /// # Errors
    ///
    /// `RegistryError::UnknownSession` if the session does not exist;
    /// callers report this and keep the connection alive.
    pub async fn add_member(
        &self,
        session_id: SessionId,
        conn: ConnId,
        identity: String,
        outbound: Outbound,
    ) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or(RegistryError::UnknownSession { session_id })?;
        session.members.insert(conn, Member { identity, outbound });
        Ok(())
    }

    /// Remove `conn` from `session_id`'s membership.
    ///
    /// Run unconditionally on every connection exit path so a dead socket
    /// never lingers as a broadcast target. Removing a connection that
    /// was never added is a no-op.
    ///
    /// # Errors
    ///
    /// `RegistryError::UnknownSession` if the session does not exist.
    pub async fn remove_member(
        &self,
        session_id: SessionId,
        conn: ConnId,
    ) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or(RegistryError::UnknownSession { session_id })?;
        session.members.remove(&conn);
        Ok(())
    }

    /// Deliver `message` to every member of `session_id` whose identity
    /// is not `exclude`.
    ///
    /// Best-effort: a write failure to one member is logged and skipped,
    /// never aborting delivery to the rest. There is no retry and no
    /// at-least-once guarantee. The whole iteration runs under the table
    /// lock, so membership cannot change mid-fan-out.
    ///
    /// # Errors
    ///
    /// `RegistryError::UnknownSession` if the session does not exist.
    pub async fn broadcast(
        &self,
        session_id: SessionId,
        message: &Message,
        exclude: Option<&str>,
    ) -> Result<(), RegistryError> {
        let sessions = self.sessions.lock().await;
        let session = sessions
            .get(&session_id)
            .ok_or(RegistryError::UnknownSession { session_id })?;
        for member in session.members.values() {
            if exclude == Some(member.identity.as_str()) {
                continue;
            }
            let mut writer = member.outbound.lock().await;
            if let Err(e) = message.write_to(&mut *writer).await {
                tracing::warn!(
                    identity = %member.identity,
                    error = %e,
                    "broadcast delivery failed",
                );
            }
        }
        Ok(())
    }

    /// Identities of the current members of `session_id`.
    ///
    /// # Errors
    ///
    /// `RegistryError::UnknownSession` if the session does not exist.
    pub async fn identities(&self, session_id: SessionId) -> Result<Vec<String>, RegistryError> {
        let sessions = self.sessions.lock().await;
        let session = sessions
            .get(&session_id)
            .ok_or(RegistryError::UnknownSession { session_id })?;
        Ok(session.members.values().map(|m| m.identity.clone()).collect())
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
