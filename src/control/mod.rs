//! Tor control channel
//!
//! This module provides the narrow capability the bootstrapper needs from the
//! local Tor daemon: connect, authenticate, and provision an ephemeral onion
//! listener. The real implementation speaks the Tor control protocol over a
//! Unix socket; a configurable mock is available for tests.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::onion::ServiceIdentity;

pub mod mock;
mod reply;
mod tor;

pub use reply::Reply;
pub use tor::{TorConnector, TorControl};

/// Error types for control channel operations
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Failed to connect to control socket: {0}")]
    ConnectionFailed(io::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Control request timed out")]
    Timeout,

    #[error("Control connection closed by daemon")]
    ConnectionClosed,

    #[error("Control connection is out of step after an earlier failure")]
    Desynchronized,

    #[error("Malformed control reply: {0}")]
    MalformedReply(String),

    #[error("Daemon rejected command ({code}): {message}")]
    Rejected { code: u16, message: String },

    #[error("Daemon did not report a service id")]
    MissingServiceId,

    #[error("Daemon published {actual} but the identity derives {expected}")]
    ServiceIdMismatch { expected: String, actual: String },

    #[error("Failed to bind local listener: {0}")]
    BindFailed(io::Error),
}

/// Result type for control channel operations
pub type ControlResult<T> = Result<T, ControlError>;

/// Opens control sessions to the overlay daemon.
#[async_trait]
pub trait ControlConnector: Send + Sync {
    /// Session type produced by this connector
    type Session: ControlSession;

    /// Open a new, unauthenticated control session
    async fn connect(&self) -> ControlResult<Self::Session>;
}

/// An open control session.
///
/// Dropping a session closes the connection, and the daemon discards any
/// ephemeral services that were added through it.
#[async_trait]
pub trait ControlSession: Send {
    /// Authenticate with the daemon's shared cookie
    async fn authenticate(&mut self, cookie: &[u8]) -> ControlResult<()>;

    /// Ask the daemon to publish `identity` on `virtual_port` and return the
    /// local listener the daemon forwards connections to.
    async fn request_listener(
        &mut self,
        virtual_port: u16,
        identity: &ServiceIdentity,
    ) -> ControlResult<OnionListener>;

    /// Withdraw published services and close the session
    async fn close(self) -> ControlResult<()>;
}

/// Local listener backing a published onion service.
#[derive(Debug)]
pub struct OnionListener {
    listener: TcpListener,
    service_id: String,
    virtual_port: u16,
}

impl OnionListener {
    /// Create a new onion listener
    pub fn new(listener: TcpListener, service_id: String, virtual_port: u16) -> Self {
        Self {
            listener,
            service_id,
            virtual_port,
        }
    }

    /// Service id assigned by the daemon (address without `.onion`)
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Port visitors connect to on the onion address
    pub fn virtual_port(&self) -> u16 {
        self.virtual_port
    }

    /// Local endpoint the daemon forwards to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Take the underlying TCP listener for serving
    pub fn into_inner(self) -> TcpListener {
        self.listener
    }
}

/// Bind the loopback listener a daemon forwards onion traffic to.
pub async fn bind_loopback() -> ControlResult<TcpListener> {
    TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(ControlError::BindFailed)
}
