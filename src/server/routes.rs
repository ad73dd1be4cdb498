//! HTTP routes for the web server.
//!
//! The route table is built once at startup and never changes afterwards.
//! A single fallback handler canonicalises the request path and dispatches
//! through the table, so there is no global registry and nothing to lock.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use percent_encoding::percent_decode_str;
use tracing::debug;

use super::files::{FileHandler, FileServe};
use crate::filename::generate_filename;

/// Body returned for the root path.
pub const INDEX_GREETING: &str = "I'm just a happy little web server.\n";

/// Errors while building the route table
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("URL path {0} is already registered")]
    DuplicatePath(String),
}

/// One served file and the URL path it was published under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMapping {
    pub source: PathBuf,
    pub url_path: String,
}

/// Immutable mapping from URL path to file handler.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<String, FileHandler>,
    mappings: Vec<FileMapping>,
}

impl RouteTable {
    /// Create an empty table that only answers the root path
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish every file in `files` under a freshly generated URL path
    pub fn from_files(files: &[PathBuf], serve: Arc<dyn FileServe>) -> Result<Self, RouteError> {
        Self::from_files_with(files, serve, generate_filename)
    }

    /// Like [`RouteTable::from_files`] with a custom URL name generator
    pub fn from_files_with<F>(
        files: &[PathBuf],
        serve: Arc<dyn FileServe>,
        generate: F,
    ) -> Result<Self, RouteError>
    where
        F: Fn(&Path) -> String,
    {
        let mut table = Self::new();
        for source in files {
            let url_path = format!("/{}", generate(source));
            table.insert(url_path.clone(), FileHandler::new(source, serve.clone()))?;
            debug!("Registered {} for {}", url_path, source.display());
        }
        Ok(table)
    }

    fn insert(&mut self, url_path: String, handler: FileHandler) -> Result<(), RouteError> {
        if url_path == "/" || self.routes.contains_key(&url_path) {
            return Err(RouteError::DuplicatePath(url_path));
        }

        self.mappings.push(FileMapping {
            source: handler.source().to_path_buf(),
            url_path: url_path.clone(),
        });
        self.routes.insert(url_path, handler);
        Ok(())
    }

    /// Handler registered for exactly `url_path`
    pub fn get(&self, url_path: &str) -> Option<&FileHandler> {
        self.routes.get(url_path)
    }

    /// Registered files in registration order
    pub fn mappings(&self) -> &[FileMapping] {
        &self.mappings
    }

    /// Number of file routes (the root is not counted)
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no files are registered
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Build the router for a route table.
pub fn build_router(routes: Arc<RouteTable>) -> Router {
    Router::new().fallback(dispatch).with_state(routes)
}

/// Route every request through the table.
///
/// Matching happens on the percent-decoded path, so non-ASCII extensions
/// match however the client escapes them.
async fn dispatch(State(routes): State<Arc<RouteTable>>, request: Request) -> Response {
    let path = match percent_decode_str(request.uri().path()).decode_utf8() {
        Ok(path) => path.into_owned(),
        Err(_) => {
            debug!("Rejecting path that is not UTF-8 once decoded");
            return not_found();
        }
    };

    if clean_path(&path) != path {
        debug!("Rejecting non-canonical path {}", path);
        return not_found();
    }

    if path == "/" {
        return index_handler().await.into_response();
    }

    match routes.get(&path) {
        Some(handler) => handler.handle(request).await,
        None => not_found(),
    }
}

/// Handler for the root path.
async fn index_handler() -> impl IntoResponse {
    INDEX_GREETING
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "404 page not found\n").into_response()
}

/// Lexically canonicalise a URL path.
///
/// Collapses repeated slashes, drops `.` segments, resolves `..` against the
/// preceding segment and removes any trailing slash. `..` never climbs above
/// the root.
pub fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|last| *last != "..") {
                    segments.pop();
                } else if !rooted {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if rooted {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}
