//! TCP listener wrapper.
//!
//! Plain TCP, no transport-level encryption: confidentiality lives in the
//! payload layer, where the relay cannot reach it. Failure to bind is the
//! one process-fatal error in the server; everything after that is scoped
//! to a single connection.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

use crate::error::ServerError;

/// Listening TCP socket for the relay.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Parse `address` and bind it.
    ///
    /// # Errors
    ///
    /// `ServerError::Config` for an unparseable address,
    /// `ServerError::Transport` if the bind itself fails (port in use,
    /// insufficient privileges).
    pub async fn bind(address: &str) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

        let inner = TcpListener::bind(addr).await?;
        tracing::info!("listening on {}", addr);

        Ok(Self { inner })
    }

    /// Accept the next inbound connection.
    pub async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        self.inner.accept().await
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.inner.local_addr()?)
    }
}
