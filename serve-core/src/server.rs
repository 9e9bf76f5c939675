//! Listener lifecycle
//!
//! Binds plain HTTP or rustls HTTPS and stops through the
//! `axum_server::Handle` once the shutdown future resolves.

use crate::assets::AssetRegistry;
use crate::certificates::{CertificateProvisioner, ProvisionedCertificate};
use crate::config::ServerConfig;
use crate::error::ServeError;
use crate::router::build_router;
use crate::Result;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::future::Future;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Listener for a [`ServerConfig`]: provisions TLS material, binds, serves
/// until the shutdown future resolves, then drains within the grace period.
pub struct ServeServer {
    config: ServerConfig,
    assets: AssetRegistry,
    provisioner: CertificateProvisioner,
    handle: Handle,
}

impl ServeServer {
    pub fn new(config: ServerConfig, assets: AssetRegistry) -> Self {
        Self {
            config,
            assets,
            provisioner: CertificateProvisioner::default(),
            handle: Handle::new(),
        }
    }

    pub fn with_provisioner(mut self, provisioner: CertificateProvisioner) -> Self {
        self.provisioner = provisioner;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle to the listener; `listening()` yields the bound address.
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Makes sure certificate and key files exist when TLS is enabled and
    /// records their paths in the configuration.
    pub fn prepare_tls(&mut self) -> Result<Option<ProvisionedCertificate>> {
        if !self.config.tls.enabled {
            return Ok(None);
        }

        let provisioned = self.provisioner.ensure(
            self.config.tls.cert_path.as_deref(),
            self.config.tls.key_path.as_deref(),
        )?;
        self.config.tls.cert_path = Some(provisioned.cert_path.clone());
        self.config.tls.key_path = Some(provisioned.key_path.clone());
        Ok(Some(provisioned))
    }

    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.config.validate()?;
        let provisioned = self.prepare_tls()?;
        let addr = resolve_listen_addr(&self.config.listen_address()).await?;

        let tls = match &provisioned {
            Some(cert) => Some(load_tls_config(&cert.cert_path, &cert.key_path)?),
            None => None,
        };

        let scheme = self.config.scheme();
        let grace = self.config.shutdown_grace;
        let app = build_router(self.config, self.assets)?
            .into_make_service_with_connect_info::<SocketAddr>();

        let listening = self.handle.clone();
        tokio::spawn(async move {
            if let Some(bound) = listening.listening().await {
                info!(
                    "Started dirserve {} server ({}://{})",
                    scheme.to_uppercase(),
                    scheme,
                    bound
                );
            }
        });

        let stopping = self.handle.clone();
        tokio::spawn(async move {
            shutdown.await;
            info!("Interrupted. Shutting down...");
            stopping.graceful_shutdown(Some(grace));
        });

        let served = match tls {
            Some(tls) => {
                axum_server::bind_rustls(addr, tls)
                    .handle(self.handle)
                    .serve(app)
                    .await
            }
            None => axum_server::bind(addr).handle(self.handle).serve(app).await,
        };
        served.map_err(|e| ServeError::Network(format!("server on {} failed: {}", addr, e)))?;

        info!("Server stopped");
        Ok(())
    }
}

async fn resolve_listen_addr(address: &str) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host(address)
        .await
        .map_err(|e| ServeError::Network(format!("cannot resolve {}: {}", address, e)))?;
    addrs
        .next()
        .ok_or_else(|| ServeError::Network(format!("{} resolved to no addresses", address)))
}

/// Server TLS configuration from PEM files, using the ring provider.
fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig> {
    let io_err = |path: &Path, source: std::io::Error| ServeError::CertificateIo {
        path: path.to_path_buf(),
        source,
    };

    let mut cert_reader = BufReader::new(File::open(cert_path).map_err(|e| io_err(cert_path, e))?);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| io_err(cert_path, e))?;
    if certs.is_empty() {
        return Err(ServeError::Configuration(format!(
            "no certificate found in {}",
            cert_path.display()
        )));
    }

    let mut key_reader = BufReader::new(File::open(key_path).map_err(|e| io_err(key_path, e))?);
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| io_err(key_path, e))?
        .ok_or_else(|| {
            ServeError::Configuration(format!("no private key found in {}", key_path.display()))
        })?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .and_then(|builder| builder.with_no_client_auth().with_single_cert(certs, key))
        .map_err(|e| ServeError::Configuration(format!("invalid TLS material: {}", e)))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(RustlsConfig::from_config(Arc::new(config)))
}
