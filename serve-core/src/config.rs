//! Configuration types and utilities

use crate::error::ServeError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";
pub const DEFAULT_LISTEN_PORT: u16 = 8080;

/// Static server configuration.
/// These settings are resolved at startup and do not change during runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Served directory, absolute and symlink-resolved
    pub root_dir: PathBuf,
    /// Add permissive CORS headers to every response
    pub cors_enabled: bool,
    /// Theme used for directory indexes
    pub theme: DirViewTheme,
    /// TLS settings
    pub tls: TlsConfig,
    /// Reverse proxy settings. When present, nothing is served from `root_dir`.
    pub proxy: Option<ProxyConfig>,
    /// How long in-flight requests may run after a shutdown signal
    #[serde(with = "duration_secs")]
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_LISTEN_HOST.to_string(),
            port: DEFAULT_LISTEN_PORT,
            root_dir: PathBuf::from("."),
            cors_enabled: false,
            theme: DirViewTheme::default(),
            tls: TlsConfig::default(),
            proxy: None,
            shutdown_grace: Duration::from_secs(3),
        }
    }
}

impl ServerConfig {
    /// Checks the cross-field invariants that the CLI layer also enforces.
    pub fn validate(&self) -> Result<()> {
        self.tls.validate()?;
        if let Some(proxy) = &self.proxy {
            if proxy.target.trim().is_empty() {
                return Err(ServeError::ProxyConfigInvalid("empty target".to_string()));
            }
        }
        if !self.root_dir.is_absolute() && self.proxy.is_none() {
            return Err(ServeError::Configuration(format!(
                "root directory {} must be resolved before starting",
                self.root_dir.display()
            )));
        }
        Ok(())
    }

    /// Scheme clients use to reach this server.
    pub fn scheme(&self) -> &'static str {
        if self.tls.enabled {
            "https"
        } else {
            "http"
        }
    }

    /// `host:port`, with IPv6 hosts bracketed.
    pub fn listen_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// TLS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Serve over HTTPS
    pub enabled: bool,
    /// Externally supplied certificate (PEM)
    pub cert_path: Option<PathBuf>,
    /// Externally supplied private key (PEM)
    pub key_path: Option<PathBuf>,
}

impl TlsConfig {
    /// Certificate and key must be supplied together or not at all.
    pub fn validate(&self) -> Result<()> {
        match (&self.cert_path, &self.key_path) {
            (Some(_), None) | (None, Some(_)) => Err(ServeError::CertificateMissingPair),
            _ => Ok(()),
        }
    }
}

/// Reverse proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Upstream base URL; its path acts as a mount prefix
    pub target: String,
    /// Attach X-Forwarded-For / X-Forwarded-Proto
    pub include_forwarding_headers: bool,
    /// Strip `Location` and expose it as `X-Original-Location`
    pub ignore_redirects: bool,
}

/// Directory index themes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirViewTheme {
    /// Plain table in filesystem order, no inline styles
    Basic,
    /// Sorted listing with a stylesheet
    #[default]
    Pretty,
}

impl DirViewTheme {
    pub const ALL: [DirViewTheme; 2] = [DirViewTheme::Basic, DirViewTheme::Pretty];

    pub fn as_str(&self) -> &'static str {
        match self {
            DirViewTheme::Basic => "basic",
            DirViewTheme::Pretty => "pretty",
        }
    }

    /// Whether entries are shown directories-first and sorted by name.
    pub fn sorts_entries(&self) -> bool {
        matches!(self, DirViewTheme::Pretty)
    }

    /// Whether the rendered page carries inline markup that needs a CSP nonce.
    pub fn needs_nonce(&self) -> bool {
        matches!(self, DirViewTheme::Pretty)
    }
}

impl fmt::Display for DirViewTheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DirViewTheme {
    type Err = ServeError;

    fn from_str(s: &str) -> Result<Self> {
        DirViewTheme::ALL
            .into_iter()
            .find(|theme| theme.as_str() == s)
            .ok_or_else(|| {
                ServeError::Configuration(format!(
                    "invalid value for 'index-theme': {} (expected one of: basic, pretty)",
                    s
                ))
            })
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
