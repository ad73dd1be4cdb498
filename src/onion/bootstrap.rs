//! One-shot onion service bring-up.
//!
//! Runs once before any request can arrive: connect to the control port,
//! authenticate with the cookie, generate a fresh identity, and have the
//! daemon publish it. Each step is a hard precondition for the next and any
//! failure aborts the whole bring-up.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info};

use super::ServiceIdentity;
use crate::control::{ControlConnector, ControlError, ControlSession, OnionListener};

/// Well-known control socket of a system Tor daemon
pub const DEFAULT_CONTROL_SOCKET: &str = "/run/tor/control";

/// Well-known authentication cookie of a system Tor daemon
pub const DEFAULT_AUTH_COOKIE: &str = "/run/tor/control.authcookie";

/// Port visitors connect to on the onion address
pub const DEFAULT_VIRTUAL_PORT: u16 = 80;

/// Size of Tor's control authentication cookie
pub const COOKIE_LENGTH: usize = 32;

/// Errors that abort bring-up.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Failed to connect to control port: {0}")]
    Connect(#[source] ControlError),

    #[error("Failed to read auth cookie {}: {source}", path.display())]
    CookieRead { path: PathBuf, source: io::Error },

    #[error("Authentication failed: {0}")]
    Authenticate(#[source] ControlError),

    #[error("Failed to generate service key: {0}")]
    KeyGeneration(#[from] rand::Error),

    #[error("Failed to get listener: {0}")]
    Listener(#[source] ControlError),
}

/// Settings for bring-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Path of the control authentication cookie
    pub auth_cookie: PathBuf,
    /// Port to publish on the onion address
    pub virtual_port: u16,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            auth_cookie: PathBuf::from(DEFAULT_AUTH_COOKIE),
            virtual_port: DEFAULT_VIRTUAL_PORT,
        }
    }
}

/// A published onion service ready to serve.
///
/// Owns the control session for as long as the service should stay up.
#[derive(Debug)]
pub struct HiddenService<S> {
    pub session: S,
    pub identity: ServiceIdentity,
    pub listener: OnionListener,
}

/// Bring up an onion service through `connector`.
///
/// Logs the onion address once it is known. On error nothing is left
/// running: the session, if any, is dropped, which closes the connection
/// and makes the daemon forget the service.
pub async fn bootstrap<C: ControlConnector>(
    connector: &C,
    config: &BootstrapConfig,
) -> Result<HiddenService<C::Session>, BootstrapError> {
    let start_time = Instant::now();

    let mut session = connector.connect().await.map_err(BootstrapError::Connect)?;
    debug!("Connected to control port");

    let cookie = read_cookie(&config.auth_cookie).await?;
    session
        .authenticate(&cookie)
        .await
        .map_err(BootstrapError::Authenticate)?;
    debug!("Authenticated with control port");

    let identity = ServiceIdentity::generate()?;
    info!("Onion address: {}", identity.address());

    let listener = session
        .request_listener(config.virtual_port, &identity)
        .await
        .map_err(BootstrapError::Listener)?;

    debug!(
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "Onion service published"
    );

    Ok(HiddenService {
        session,
        identity,
        listener,
    })
}

async fn read_cookie(path: &Path) -> Result<Vec<u8>, BootstrapError> {
    let cookie_error = |source| BootstrapError::CookieRead {
        path: path.to_path_buf(),
        source,
    };

    let cookie = tokio::fs::read(path).await.map_err(cookie_error)?;
    if cookie.len() != COOKIE_LENGTH {
        return Err(cookie_error(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "expected {} bytes, found {}",
                COOKIE_LENGTH,
                cookie.len()
            ),
        )));
    }
    Ok(cookie)
}
