//! Tor control port client
//!
//! Talks to a local Tor daemon over its control Unix socket. Only the handful
//! of commands needed for an ephemeral onion service are implemented.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::{debug, warn};

use super::reply::{parse_line, LineKind, Reply};
use super::{
    bind_loopback, ControlConnector, ControlError, ControlResult, ControlSession, OnionListener,
};
use crate::onion::ServiceIdentity;

/// Default timeout for a single command round trip
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connects to Tor's control socket at a fixed path.
#[derive(Debug, Clone)]
pub struct TorConnector {
    socket_path: PathBuf,
}

impl TorConnector {
    /// Create a connector for the given control socket path
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }
}

#[async_trait]
impl ControlConnector for TorConnector {
    type Session = TorControl;

    async fn connect(&self) -> ControlResult<TorControl> {
        TorControl::connect(&self.socket_path).await
    }
}

/// An open Tor control connection.
pub struct TorControl {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    timeout: Duration,
    services: Vec<String>,
    // Set once a command fails mid-exchange; unread reply lines may remain.
    poisoned: bool,
}

impl TorControl {
    /// Connect to the control socket at `socket_path`
    pub async fn connect(socket_path: &Path) -> ControlResult<Self> {
        debug!("Connecting to Tor control socket at {:?}", socket_path);

        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(ControlError::ConnectionFailed)?;

        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            timeout: DEFAULT_TIMEOUT,
            services: Vec::new(),
            poisoned: false,
        })
    }

    /// Send a command and wait for its complete reply.
    ///
    /// `verb` is the only part of the command that is logged; arguments may
    /// carry secrets. After a transport failure or timeout the session
    /// refuses further commands, since the next reply read could belong to
    /// the abandoned one.
    async fn command(&mut self, verb: &str, line: &str) -> ControlResult<Reply> {
        if self.poisoned {
            return Err(ControlError::Desynchronized);
        }

        let result = match tokio::time::timeout(self.timeout, self.command_inner(verb, line)).await
        {
            Ok(result) => result,
            Err(_) => Err(ControlError::Timeout),
        };
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    async fn command_inner(&mut self, verb: &str, line: &str) -> ControlResult<Reply> {
        debug!("Sending control command {}", verb);

        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;

        let reply = self.read_reply().await?;
        debug!("Control command {} answered with {}", verb, reply.code);
        Ok(reply)
    }

    async fn read_reply(&mut self) -> ControlResult<Reply> {
        let mut lines = Vec::new();

        loop {
            let line = self.read_line().await?;
            let (code, kind, text) = parse_line(&line)?;

            match kind {
                LineKind::Mid => lines.push(text.to_string()),
                LineKind::Data => {
                    let mut data = text.to_string();
                    loop {
                        let data_line = self.read_line().await?;
                        let data_line = data_line.trim_end_matches(['\r', '\n']);
                        if data_line == "." {
                            break;
                        }
                        data.push('\n');
                        data.push_str(data_line.strip_prefix('.').unwrap_or(data_line));
                    }
                    lines.push(data);
                }
                LineKind::End => {
                    lines.push(text.to_string());
                    return Ok(Reply { code, lines });
                }
            }
        }
    }

    async fn read_line(&mut self) -> ControlResult<String> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Err(ControlError::ConnectionClosed);
        }
        Ok(line)
    }
}

#[async_trait]
impl ControlSession for TorControl {
    async fn authenticate(&mut self, cookie: &[u8]) -> ControlResult<()> {
        let line = format!("AUTHENTICATE {}", hex::encode(cookie));
        self.command("AUTHENTICATE", &line).await?.into_result()?;
        debug!("Authenticated with Tor control port");
        Ok(())
    }

    async fn request_listener(
        &mut self,
        virtual_port: u16,
        identity: &ServiceIdentity,
    ) -> ControlResult<OnionListener> {
        let listener = bind_loopback().await?;
        let target = listener.local_addr().map_err(ControlError::BindFailed)?;

        let line = format!(
            "ADD_ONION {} Flags=DiscardPK Port={},{}",
            identity.control_key_blob(),
            virtual_port,
            target
        );
        let reply = self.command("ADD_ONION", &line).await?.into_result()?;

        let service_id = reply
            .value("ServiceID")
            .ok_or(ControlError::MissingServiceId)?
            .to_string();
        self.services.push(service_id.clone());

        let expected = identity.address().service_id();
        if service_id != expected {
            return Err(ControlError::ServiceIdMismatch {
                expected,
                actual: service_id,
            });
        }

        debug!(
            "Onion service {} forwarding port {} to {}",
            service_id, virtual_port, target
        );
        Ok(OnionListener::new(listener, service_id, virtual_port))
    }

    async fn close(mut self) -> ControlResult<()> {
        if self.poisoned {
            // Dropping the connection makes Tor discard the services.
            debug!("Dropping unusable Tor control session");
            return Ok(());
        }

        for service_id in std::mem::take(&mut self.services) {
            let line = format!("DEL_ONION {}", service_id);
            if let Err(e) = self
                .command("DEL_ONION", &line)
                .await
                .and_then(Reply::into_result)
            {
                warn!("Failed to withdraw onion service {}: {}", service_id, e);
            }
        }

        // Tor answers QUIT with 250 and then hangs up.
        self.command("QUIT", "QUIT").await?.into_result()?;
        debug!("Closed Tor control session");
        Ok(())
    }
}
