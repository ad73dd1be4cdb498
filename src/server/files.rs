//! Per-file request handlers.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::warn;

/// Capability to answer a request with the bytes of a file.
///
/// Implementations handle range and conditional requests and pick a content
/// type. An `Err` means the file could not be opened.
#[async_trait]
pub trait FileServe: Send + Sync {
    async fn serve(&self, path: &Path, request: Request) -> io::Result<Response>;
}

/// Serves files from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskFiles;

#[async_trait]
impl FileServe for DiskFiles {
    async fn serve(&self, path: &Path, request: Request) -> io::Result<Response> {
        // Open first so an unreadable file surfaces as an error rather than a 404.
        let file = tokio::fs::File::open(path).await?;

        let response = match ServeFile::new(path).oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
        drop(file);

        Ok(response.map(Body::new))
    }
}

/// Handler bound to one source file.
#[derive(Clone)]
pub struct FileHandler {
    source: PathBuf,
    files: Arc<dyn FileServe>,
}

impl FileHandler {
    /// Create a handler serving `source` through `files`
    pub fn new(source: impl Into<PathBuf>, files: Arc<dyn FileServe>) -> Self {
        Self {
            source: source.into(),
            files,
        }
    }

    /// The file this handler serves
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Answer one request.
    ///
    /// Open failures become a bare 500; the cause is only logged.
    pub async fn handle(&self, request: Request) -> Response {
        let mut response = match self.files.serve(&self.source, request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to open {}: {}", self.source.display(), e);
                internal_error()
            }
        };

        apply_security_headers(response.headers_mut());
        response
    }
}

impl std::fmt::Debug for FileHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandler")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error\n").into_response()
}

/// Forbid framing and any subresource loads for served files.
pub fn apply_security_headers(headers: &mut HeaderMap) {
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'"),
    );
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
}
