//! Web server for published files.

pub mod files;
pub mod routes;

pub use files::{apply_security_headers, DiskFiles, FileHandler, FileServe};
pub use routes::{build_router, clean_path, FileMapping, RouteError, RouteTable, INDEX_GREETING};

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};

use crate::control::{ControlConnector, ControlSession};
use crate::onion::{bootstrap, BootstrapConfig, HiddenService, OnionAddress};

/// A published onion service with its routes, ready to accept requests.
pub struct OnionServer<S> {
    service: HiddenService<S>,
    routes: Arc<RouteTable>,
}

impl<S: ControlSession> OnionServer<S> {
    /// Bring up the onion service and build the route table for `files`.
    ///
    /// Fails without serving anything if any step of bring-up fails or the
    /// route table cannot be built.
    pub async fn start<C>(
        connector: &C,
        config: &BootstrapConfig,
        files: &[PathBuf],
        serve: Arc<dyn FileServe>,
    ) -> anyhow::Result<Self>
    where
        C: ControlConnector<Session = S>,
    {
        let service = bootstrap(connector, config)
            .await
            .context("Failed to publish onion service")?;

        let routes = RouteTable::from_files(files, serve).context("Failed to build routes")?;

        let local = service
            .listener
            .local_addr()
            .context("Failed to read listener address")?;
        info!("Listener: {}", local);

        let address = service.identity.address();
        for mapping in routes.mappings() {
            info!(
                "{} -> http://{}{}",
                mapping.source.display(),
                address,
                mapping.url_path
            );
        }

        Ok(Self {
            service,
            routes: Arc::new(routes),
        })
    }

    /// Onion address of the running service
    pub fn address(&self) -> &OnionAddress {
        self.service.identity.address()
    }

    /// Local endpoint the daemon forwards visitors to
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.service.listener.local_addr()
    }

    /// Published routes
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Serve requests until `shutdown` resolves or the server fails, then
    /// withdraw the service.
    pub async fn serve_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let HiddenService {
            session, listener, ..
        } = self.service;

        let app = build_router(self.routes);

        let served = axum::serve(listener.into_inner(), app)
            .with_graceful_shutdown(shutdown)
            .await;

        if let Err(e) = session.close().await {
            warn!("Failed to close control session cleanly: {}", e);
        }

        served.context("Server failed")?;
        info!("Server stopped");
        Ok(())
    }
}

/// Publish `files` and serve them until Ctrl+C or SIGTERM.
///
/// This function will:
/// 1. Bring up the onion service through `connector`
/// 2. Build the route table and log every file's URL
/// 3. Serve requests on the onion listener
/// 4. Withdraw the service on shutdown
pub async fn run_service<C: ControlConnector>(
    connector: &C,
    config: &BootstrapConfig,
    files: &[PathBuf],
) -> anyhow::Result<()> {
    let server = OnionServer::start(connector, config, files, Arc::new(DiskFiles)).await?;
    server.serve_until(shutdown_signal()).await
}

/// Wait for the shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::mock::{MockControl, MockFailure, MockConfig};
    use crate::onion::COOKIE_LENGTH;
    use tempfile::TempDir;

    fn cookie_config(temp_dir: &TempDir) -> BootstrapConfig {
        let path = temp_dir.path().join("control.authcookie");
        std::fs::write(&path, [0u8; COOKIE_LENGTH]).unwrap();
        BootstrapConfig {
            auth_cookie: path,
            virtual_port: 80,
        }
    }

    #[tokio::test]
    async fn test_start_builds_routes_after_bootstrap() {
        let temp_dir = TempDir::new().unwrap();
        let config = cookie_config(&temp_dir);
        let control = MockControl::new();
        let files = vec![PathBuf::from("a.jpg"), PathBuf::from("b.tar.gz")];

        let server = OnionServer::start(&control, &config, &files, Arc::new(DiskFiles))
            .await
            .unwrap();

        assert_eq!(server.routes().len(), 2);
        assert_eq!(
            control.record().published[0].0,
            server.address().service_id()
        );
        assert_eq!(
            control.record().listener_addr,
            Some(server.local_addr().unwrap())
        );
    }

    #[tokio::test]
    async fn test_start_logs_address_and_each_mapping_once() {
        let temp_dir = TempDir::new().unwrap();
        let config = cookie_config(&temp_dir);
        let control = MockControl::new();
        let files = vec![PathBuf::from("a.jpg"), PathBuf::from("b.tar.gz")];

        let (logs, _guard) = crate::logging::capture::CapturedLogs::install();
        let server = OnionServer::start(&control, &config, &files, Arc::new(DiskFiles))
            .await
            .unwrap();
        let lines = logs.lines();

        let service_id = server.address().service_id();
        let address_lines = lines
            .iter()
            .filter(|l| l.contains(&service_id) && !l.contains(" -> "))
            .count();
        assert_eq!(address_lines, 1, "{:?}", lines);

        for mapping in server.routes().mappings() {
            let count = lines
                .iter()
                .filter(|l| l.contains(&mapping.url_path))
                .count();
            assert_eq!(count, 1, "{} in {:?}", mapping.url_path, lines);
        }
    }

    #[tokio::test]
    async fn test_start_fails_when_bootstrap_fails() {
        let temp_dir = TempDir::new().unwrap();
        let config = cookie_config(&temp_dir);
        let control = MockControl::with_config(MockConfig::failing_at(MockFailure::Listener));

        let result =
            OnionServer::start(&control, &config, &[PathBuf::from("a.jpg")], Arc::new(DiskFiles))
                .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_serve_until_closes_session() {
        let temp_dir = TempDir::new().unwrap();
        let config = cookie_config(&temp_dir);
        let control = MockControl::new();

        let server = OnionServer::start(&control, &config, &[], Arc::new(DiskFiles))
            .await
            .unwrap();
        server.serve_until(async {}).await.unwrap();

        let record = control.record();
        assert!(record.closed);
        assert_eq!(record.calls.last(), Some(&"close"));
    }
}
