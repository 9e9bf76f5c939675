//! Serve Core Library
//!
//! This library serves a directory tree over HTTP(S) with path confinement,
//! directory indexes and self-signed certificate provisioning, or forwards
//! every request to a single upstream instead.

/// Static assets referenced by index pages
pub mod assets;
pub mod certificates;
/// Configuration types and utilities
pub mod config;
/// Error types for serving operations
pub mod error;
/// Connection logging middleware
pub mod handlers;
pub mod listing;
pub mod render;
pub mod reverse_proxy;
pub mod router;
/// Path confinement against traversal and symlink escape
pub mod sanitise;
pub mod server;

pub use assets::{Asset, AssetLinks, AssetRegistry};
pub use certificates::{
    CertificateProvisioner, CertificateSource, Fingerprint, KeyPair, ProvisionedCertificate,
};
pub use config::{DirViewTheme, ProxyConfig, ServerConfig, TlsConfig};
pub use error::ServeError;
pub use listing::DirEntry;
pub use reverse_proxy::ReverseProxy;
pub use router::build_router;
pub use sanitise::{PathComparator, PathKind, PathResolver, ResolvedPath};
/// Re-export commonly used types
pub use server::ServeServer;

/// Result type alias for serving operations
pub type Result<T> = std::result::Result<T, ServeError>;
