//! dirserve binary
//!
//! Serves a directory over HTTP or HTTPS, or forwards every request to a
//! single upstream. Command line flags can also be given as `DIRSERVE_*`
//! environment variables.

use anyhow::Context;
use clap::Parser;
use serve_core::config::{DEFAULT_LISTEN_HOST, DEFAULT_LISTEN_PORT};
use serve_core::sanitise::resolve_root;
use serve_core::{
    AssetRegistry, DirViewTheme, ProxyConfig, ReverseProxy, ServeError, ServeServer, ServerConfig,
    TlsConfig,
};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub mod logging;


use logging::LoggingConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "dirserve", author, version, about, long_about = None)]
pub struct Args {
    /// Address to listen on: `host`, `host:port`, `:port` or `[ipv6]:port`
    #[arg(value_name = "HOST:PORT", env = "DIRSERVE_ADDRESS")]
    pub address: Option<String>,

    /// Directory to serve
    #[arg(short = 'd', long = "dir", default_value = ".", env = "DIRSERVE_DIR")]
    pub dir: PathBuf,

    /// Serve over HTTPS
    #[arg(long, env = "DIRSERVE_HTTPS")]
    pub https: bool,

    /// Certificate file (PEM); a self-signed one is generated when omitted
    #[arg(long = "sslcert", env = "DIRSERVE_SSLCERT")]
    pub ssl_cert: Option<PathBuf>,

    /// Private key file (PEM), required together with --sslcert
    #[arg(long = "sslkey", env = "DIRSERVE_SSLKEY")]
    pub ssl_key: Option<PathBuf>,

    /// Add permissive CORS headers to every response
    #[arg(short = 'c', long = "cors", env = "DIRSERVE_CORS")]
    pub cors: bool,

    /// Directory index theme
    #[arg(
        long = "index-theme",
        default_value = "pretty",
        value_parser = ["basic", "pretty"],
        env = "DIRSERVE_INDEX_THEME"
    )]
    pub index_theme: String,

    /// Forward every request to this upstream URL instead of serving files
    #[arg(long = "proxy", value_name = "URL", env = "DIRSERVE_PROXY")]
    pub proxy: Option<String>,

    /// Send X-Forwarded-For and X-Forwarded-Proto to the upstream
    #[arg(long = "proxy-headers", env = "DIRSERVE_PROXY_HEADERS")]
    pub proxy_headers: bool,

    /// Do not let the browser follow upstream redirects
    #[arg(long = "proxy-ignore-redirect", env = "DIRSERVE_PROXY_IGNORE_REDIRECT")]
    pub proxy_ignore_redirect: bool,

    /// Disable colored log output
    #[arg(long = "nocolor", env = "DIRSERVE_NOCOLOR")]
    pub no_color: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", default_value = "info", env = "DIRSERVE_LOG_LEVEL")]
    pub log_level: String,

    /// Seconds in-flight requests may run after a shutdown signal
    #[arg(long = "shutdown-grace-secs", default_value_t = 3, env = "DIRSERVE_SHUTDOWN_GRACE_SECS")]
    pub shutdown_grace_secs: u64,
}

impl Args {
    /// Validates the arguments and resolves them into the immutable server
    /// configuration. The served directory is canonicalized here, once.
    pub fn into_server_config(&self) -> Result<ServerConfig, ServeError> {
        let (host, port) = match self.address.as_deref() {
            Some(address) => parse_host_port(address)?,
            None => (DEFAULT_LISTEN_HOST.to_string(), DEFAULT_LISTEN_PORT),
        };

        let theme: DirViewTheme = self.index_theme.parse()?;

        let tls = TlsConfig {
            enabled: self.https,
            cert_path: self.ssl_cert.clone(),
            key_path: self.ssl_key.clone(),
        };
        tls.validate()?;

        let proxy = match &self.proxy {
            Some(target) => {
                // Fail at startup rather than on the first request.
                ReverseProxy::new(target, self.proxy_headers, self.proxy_ignore_redirect)?;
                Some(ProxyConfig {
                    target: target.clone(),
                    include_forwarding_headers: self.proxy_headers,
                    ignore_redirects: self.proxy_ignore_redirect,
                })
            }
            None => None,
        };

        let root_dir = match proxy {
            Some(_) => self.dir.clone(),
            None => resolve_root(&self.dir)?,
        };

        let config = ServerConfig {
            host,
            port,
            root_dir,
            cors_enabled: self.cors,
            theme,
            tls,
            proxy,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level.clone(),
            enable_colors: !self.no_color,
            ..Default::default()
        }
    }
}

/// Splits `host:port`. Missing parts fall back to `0.0.0.0` and `8080`.
pub fn parse_host_port(input: &str) -> Result<(String, u16), ServeError> {
    let invalid = |reason: &str| {
        ServeError::Configuration(format!("invalid address '{}': {}", input, reason))
    };

    let (host, port) = if let Some(rest) = input.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| invalid("missing ']' in address"))?;
        let port = match after {
            "" => "",
            _ => after
                .strip_prefix(':')
                .ok_or_else(|| invalid("unexpected characters after ']'"))?,
        };
        (host, port)
    } else {
        match input.matches(':').count() {
            0 => (input, ""),
            1 => input.split_once(':').unwrap_or((input, "")),
            _ => return Err(invalid("too many colons in address")),
        }
    };

    let host = if host.is_empty() {
        DEFAULT_LISTEN_HOST.to_string()
    } else {
        host.to_string()
    };
    let port = if port.is_empty() {
        DEFAULT_LISTEN_PORT
    } else {
        port.parse::<u16>()
            .map_err(|_| invalid(&format!("invalid port '{}'", port)))?
    };

    Ok((host, port))
}

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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

/// Builds the configuration and serves until `shutdown` resolves.
pub async fn run<F>(args: Args, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let config = args
        .into_server_config()
        .context("Invalid configuration")?;

    match &config.proxy {
        Some(proxy) => info!(target_url = %proxy.target, "Proxying requests to {}", proxy.target),
        None => info!(
            root = %config.root_dir.display(),
            theme = %config.theme,
            "Serving {}",
            config.root_dir.display()
        ),
    }

    ServeServer::new(config, AssetRegistry::with_theme_assets())
        .run(shutdown)
        .await
        .context("Server failed")?;

    Ok(())
}
