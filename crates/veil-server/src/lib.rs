//! veil relay server.
//!
//! Accepts TCP connections and relays chat between members of numbered,
//! passphrase-guarded sessions. The server observes only the SHA-256
//! auth hash of each session's key — it verifies that joiners share the
//! creator's passphrase and forwards encrypted payloads it cannot open.
//!
//! # Architecture
//!
//! - [`SessionRegistry`]: the one shared structure — live sessions,
//!   membership, broadcast fan-out, all under a single lock.
//! - `connection`: per-connection state machine, one spawned task per
//!   accepted socket.
//! - [`Listener`]: plain-TCP accept loop; bind failure is the only
//!   process-fatal error.

mod connection;
mod error;
mod registry;
mod transport;

use std::sync::Arc;

pub use error::ServerError;
pub use registry::{
    ConnId, JoinVerdict, Outbound, RegistryError, SessionRegistry, SESSION_CAPACITY,
};
pub use transport::Listener;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind, e.g. `0.0.0.0:4040`.
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0:4040".to_string() }
    }
}

/// The relay server: a listener plus the registry it injects into every
/// connection task.
pub struct Server {
    listener: Listener,
    registry: Arc<SessionRegistry>,
}

impl Server {
    /// Bind the listener and construct the registry.
    ///
    /// # Errors
    ///
    /// `ServerError::Config` for an unparseable bind address,
    /// `ServerError::Transport` if binding fails. Both are fatal — there
    /// is no server without a listener.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = Listener::bind(&config.bind_address).await?;
        Ok(Self { listener, registry: Arc::new(SessionRegistry::new()) })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.listener.local_addr()
    }

    /// Accept connections until interrupted.
    ///
    /// Each accepted socket gets its own task; a failed accept is
    /// reported and the loop continues. Ctrl-C stops accepting and
    /// returns cleanly.
    pub async fn run(self) -> Result<(), ServerError> {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown signal received, exiting");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let registry = Arc::clone(&self.registry);
                        tokio::spawn(connection::serve(stream, peer.to_string(), registry));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                },
            }
        }
    }
}
