//! Error types for serving operations

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;
use thiserror::Error;
use tracing::error;

/// Main error type for the server core.
///
/// Path, listing and upstream variants happen per request and are turned into
/// an HTTP status at the request boundary. Certificate and proxy configuration
/// variants only happen before the listener is bound and end the process.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The requested path (or a symlink along it) does not exist
    #[error("path does not exist")]
    PathNotExists,

    /// The requested path resolves outside the served root
    #[error("unauthorized path")]
    PathUnauthorized,

    /// Directory enumeration failed
    #[error("cannot list directory: {0}")]
    Listing(#[source] std::io::Error),

    /// Exactly one of certificate / key was supplied
    #[error("both cert and key paths must be provided, or both must be empty to use a self-signed certificate")]
    CertificateMissingPair,

    /// Key or certificate generation failed
    #[error("certificate generation failed: {0}")]
    CertificateGeneration(String),

    /// Certificate or key file could not be read or written
    #[error("certificate file {}: {source}", path.display())]
    CertificateIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Proxy target could not be used
    #[error("invalid proxy target: {0}")]
    ProxyConfigInvalid(String),

    /// Upstream connection or protocol failure
    #[error("upstream request failed: {0}")]
    ProxyUpstream(#[from] reqwest::Error),

    /// Invalid startup configuration (root directory, address, theme)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Listener errors
    #[error("network error: {0}")]
    Network(String),

    /// Any other I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServeError {
    /// HTTP status a per-request error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServeError::PathNotExists => StatusCode::NOT_FOUND,
            ServeError::PathUnauthorized => StatusCode::FORBIDDEN,
            ServeError::ProxyUpstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error belongs to the startup taxonomy that aborts the process.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            ServeError::CertificateMissingPair
                | ServeError::CertificateGeneration(_)
                | ServeError::CertificateIo { .. }
                | ServeError::ProxyConfigInvalid(_)
                | ServeError::Configuration(_)
                | ServeError::Network(_)
        )
    }

    fn client_message(&self) -> &'static str {
        match self {
            ServeError::PathNotExists => "Path not found",
            ServeError::PathUnauthorized => "Not enough permission to read the given path",
            ServeError::Listing(_) => "Cannot get entries in the provided directory",
            ServeError::ProxyUpstream(_) => "Error proxying request",
            _ => "An unknown error occurred",
        }
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "request failed");
        }
        (status, self.client_message()).into_response()
    }
}
