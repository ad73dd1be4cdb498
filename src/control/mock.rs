//! Mock control channel for testing.
//!
//! Provides a configurable `ControlConnector` that behaves like a Tor daemon
//! without one running. Listeners are real loopback sockets so requests can
//! be served end to end. Every call is recorded for sequencing assertions.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{
    bind_loopback, ControlConnector, ControlError, ControlResult, ControlSession, OnionListener,
};
use crate::onion::ServiceIdentity;

/// Step at which the mock should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Refuse the connection.
    Connect,
    /// Reject the authentication cookie.
    Authenticate,
    /// Reject the listener request.
    Listener,
}

/// Configuration for mock control behaviour.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// If set, the given step fails.
    pub failure: Option<MockFailure>,
    /// If set, authentication only succeeds with this cookie.
    pub expected_cookie: Option<Vec<u8>>,
}

impl MockConfig {
    /// Create a config that fails at the given step.
    pub fn failing_at(failure: MockFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Default::default()
        }
    }

    /// Create a config that only accepts the given cookie.
    pub fn with_cookie(cookie: impl Into<Vec<u8>>) -> Self {
        Self {
            expected_cookie: Some(cookie.into()),
            ..Default::default()
        }
    }
}

/// Everything the mock has observed.
#[derive(Debug, Clone, Default)]
pub struct MockRecord {
    /// Names of the calls in the order they happened.
    pub calls: Vec<&'static str>,
    /// Cookie presented on authentication.
    pub cookie: Option<Vec<u8>>,
    /// Service id and virtual port of each published service.
    pub published: Vec<(String, u16)>,
    /// Local endpoint of the last listener handed out.
    pub listener_addr: Option<SocketAddr>,
    /// Whether `close` was called.
    pub closed: bool,
}

/// Mock control connector.
///
/// # Examples
///
/// ```ignore
/// use onionserve::control::mock::{MockConfig, MockControl, MockFailure};
///
/// let control = MockControl::with_config(MockConfig::failing_at(MockFailure::Listener));
/// let result = bootstrap(&control, &config).await;
/// assert_eq!(control.record().calls, vec!["connect", "authenticate", "request_listener"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockControl {
    config: Arc<MockConfig>,
    record: Arc<Mutex<MockRecord>>,
}

impl MockControl {
    /// Create a mock that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock with custom configuration.
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            config: Arc::new(config),
            record: Arc::default(),
        }
    }

    /// Snapshot of what the mock has observed so far.
    pub fn record(&self) -> MockRecord {
        self.record.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn note(&self, call: &'static str) {
        if let Ok(mut record) = self.record.lock() {
            record.calls.push(call);
        }
    }

    fn fails_at(&self, step: MockFailure) -> bool {
        self.config.failure == Some(step)
    }
}

#[async_trait]
impl ControlConnector for MockControl {
    type Session = MockSession;

    async fn connect(&self) -> ControlResult<MockSession> {
        self.note("connect");
        if self.fails_at(MockFailure::Connect) {
            return Err(ControlError::ConnectionFailed(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "mock control socket missing",
            )));
        }
        Ok(MockSession {
            control: self.clone(),
        })
    }
}

/// Session handed out by [`MockControl`].
#[derive(Debug)]
pub struct MockSession {
    control: MockControl,
}

#[async_trait]
impl ControlSession for MockSession {
    async fn authenticate(&mut self, cookie: &[u8]) -> ControlResult<()> {
        self.control.note("authenticate");
        if let Ok(mut record) = self.control.record.lock() {
            record.cookie = Some(cookie.to_vec());
        }

        let wrong_cookie = self
            .control
            .config
            .expected_cookie
            .as_deref()
            .is_some_and(|expected| expected != cookie);

        if self.control.fails_at(MockFailure::Authenticate) || wrong_cookie {
            return Err(ControlError::Rejected {
                code: 515,
                message: "Authentication failed".to_string(),
            });
        }
        Ok(())
    }

    async fn request_listener(
        &mut self,
        virtual_port: u16,
        identity: &ServiceIdentity,
    ) -> ControlResult<OnionListener> {
        self.control.note("request_listener");
        if self.control.fails_at(MockFailure::Listener) {
            return Err(ControlError::Rejected {
                code: 512,
                message: "Invalid key".to_string(),
            });
        }

        let listener = bind_loopback().await?;
        let local = listener.local_addr().map_err(ControlError::BindFailed)?;
        let service_id = identity.address().service_id();

        if let Ok(mut record) = self.control.record.lock() {
            record.published.push((service_id.clone(), virtual_port));
            record.listener_addr = Some(local);
        }

        Ok(OnionListener::new(listener, service_id, virtual_port))
    }

    async fn close(self) -> ControlResult<()> {
        self.control.note("close");
        if let Ok(mut record) = self.control.record.lock() {
            record.closed = true;
        }
        Ok(())
    }
}
