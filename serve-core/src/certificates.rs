//! Self-signed certificate provisioning
//!
//! When HTTPS is enabled without an external certificate, a P-256 key pair and
//! a self-signed server certificate are generated once and stored under a
//! fixed directory so later runs reuse the same certificate.

use crate::error::ServeError;
use crate::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use rcgen::{
    Certificate, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    KeyPair as RcgenKeyPair, KeyUsagePurpose, SanType, SerialNumber, PKCS_ECDSA_P256_SHA256,
};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::info;

pub const CERT_FILE_NAME: &str = "dirserve_cert.crt";
pub const KEY_FILE_NAME: &str = "dirserve_privatekey.key";

/// Validity window for generated certificates
pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Where self-signed material lives when no directory is configured.
pub fn default_store_dir() -> PathBuf {
    std::env::temp_dir().join("dirserve")
}

/// SHA-256 of a DER encoded certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of_der(der: &[u8]) -> Self {
        let digest = Sha256::digest(der);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// PEM encoded certificate and private key
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub cert_pem: String,
    pub key_pem: String,
    pub fingerprint: Fingerprint,
}

impl KeyPair {
    /// Generates a P-256 key and a self-signed server certificate valid for `validity`.
    pub fn generate(validity: Duration) -> Result<Self> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, "dirserve");
        dn.push(DnType::CommonName, "localhost");
        params.distinguished_name = dn;
        params.subject_alt_names = vec![
            SanType::DnsName("localhost".to_string()),
            SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            SanType::IpAddress(IpAddr::V6(Ipv6Addr::LOCALHOST)),
        ];

        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let not_before = OffsetDateTime::now_utc();
        params.not_before = not_before;
        params.not_after = not_before + validity;

        params.serial_number = Some(SerialNumber::from(random_serial().to_vec()));

        params.alg = &PKCS_ECDSA_P256_SHA256;
        let key_pair = RcgenKeyPair::generate(&PKCS_ECDSA_P256_SHA256)
            .map_err(|e| ServeError::CertificateGeneration(format!("private key: {}", e)))?;
        params.key_pair = Some(key_pair);

        let cert = Certificate::from_params(params)
            .map_err(|e| ServeError::CertificateGeneration(format!("certificate: {}", e)))?;

        // ECDSA signatures are randomized: serialize once and derive PEM and
        // fingerprint from the same DER.
        let der = cert
            .serialize_der()
            .map_err(|e| ServeError::CertificateGeneration(format!("serialize: {}", e)))?;

        Ok(Self {
            cert_pem: pem_encode("CERTIFICATE", &der),
            key_pem: cert.serialize_private_key_pem(),
            fingerprint: Fingerprint::of_der(&der),
        })
    }

    /// Writes the pair into `dir` under the fixed file names.
    ///
    /// The directory is created owner-only and the key file is written 0600.
    pub fn save(&self, dir: &Path) -> Result<(PathBuf, PathBuf)> {
        create_private_dir(dir).map_err(|source| ServeError::CertificateIo {
            path: dir.to_path_buf(),
            source,
        })?;

        let cert_path = dir.join(CERT_FILE_NAME);
        fs::write(&cert_path, self.cert_pem.as_bytes()).map_err(|source| {
            ServeError::CertificateIo {
                path: cert_path.clone(),
                source,
            }
        })?;

        let key_path = dir.join(KEY_FILE_NAME);
        write_private_file(&key_path, self.key_pem.as_bytes()).map_err(|source| {
            ServeError::CertificateIo {
                path: key_path.clone(),
                source,
            }
        })?;

        Ok((cert_path, key_path))
    }
}

/// Where the TLS material came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateSource {
    Supplied,
    Reused,
    Generated,
}

/// Result of [`CertificateProvisioner::ensure`]
#[derive(Debug, Clone)]
pub struct ProvisionedCertificate {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub source: CertificateSource,
    /// Known for self-signed material, `None` for supplied files
    pub fingerprint: Option<Fingerprint>,
}

/// Makes sure a usable certificate/key pair exists before the listener starts.
#[derive(Debug, Clone)]
pub struct CertificateProvisioner {
    store_dir: PathBuf,
    validity: Duration,
}

impl Default for CertificateProvisioner {
    fn default() -> Self {
        Self::new(default_store_dir())
    }
}

impl CertificateProvisioner {
    pub fn new(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            validity: DEFAULT_VALIDITY,
        }
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// Supplied paths are checked for readability; otherwise a previously
    /// generated pair is reused or a new one is generated and stored.
    pub fn ensure(
        &self,
        cert_path: Option<&Path>,
        key_path: Option<&Path>,
    ) -> Result<ProvisionedCertificate> {
        match (cert_path, key_path) {
            (Some(cert), Some(key)) => {
                check_readable(cert)?;
                check_readable(key)?;
                Ok(ProvisionedCertificate {
                    cert_path: cert.to_path_buf(),
                    key_path: key.to_path_buf(),
                    source: CertificateSource::Supplied,
                    fingerprint: None,
                })
            }
            (None, None) => self.ensure_self_signed(),
            _ => Err(ServeError::CertificateMissingPair),
        }
    }

    fn ensure_self_signed(&self) -> Result<ProvisionedCertificate> {
        if let Some((cert_path, key_path)) = existing_pair(&self.store_dir) {
            let fingerprint = fingerprint_from_pem_file(&cert_path)?;
            info!(
                cert = %cert_path.display(),
                fingerprint = %fingerprint,
                "Using previous self-signed SSL certificate"
            );
            return Ok(ProvisionedCertificate {
                cert_path,
                key_path,
                source: CertificateSource::Reused,
                fingerprint: Some(fingerprint),
            });
        }

        let key_pair = KeyPair::generate(self.validity)?;
        let (cert_path, key_path) = key_pair.save(&self.store_dir)?;
        info!(
            cert = %cert_path.display(),
            fingerprint = %key_pair.fingerprint,
            "Generated self-signed SSL certificate"
        );

        Ok(ProvisionedCertificate {
            cert_path,
            key_path,
            source: CertificateSource::Generated,
            fingerprint: Some(key_pair.fingerprint),
        })
    }
}

/// Paths of a previously stored pair, if both files exist.
pub fn existing_pair(dir: &Path) -> Option<(PathBuf, PathBuf)> {
    let cert_path = dir.join(CERT_FILE_NAME);
    let key_path = dir.join(KEY_FILE_NAME);
    if cert_path.is_file() && key_path.is_file() {
        Some((cert_path, key_path))
    } else {
        None
    }
}

/// Fingerprint of the first certificate in a PEM file.
pub fn fingerprint_from_pem_file(path: &Path) -> Result<Fingerprint> {
    let io_err = |source| ServeError::CertificateIo {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(path).map_err(io_err)?);
    let der = rustls_pemfile::certs(&mut reader)
        .next()
        .ok_or_else(|| {
            io_err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "no certificate found",
            ))
        })?
        .map_err(io_err)?;
    Ok(Fingerprint::of_der(der.as_ref()))
}

fn check_readable(path: &Path) -> Result<()> {
    File::open(path)
        .map(drop)
        .map_err(|source| ServeError::CertificateIo {
            path: path.to_path_buf(),
            source,
        })
}

fn random_serial() -> [u8; 16] {
    let mut serial = [0u8; 16];
    // All 128 bits are random; rcgen encodes the INTEGER as positive.
    OsRng.fill_bytes(&mut serial);
    serial
}

// Framed from the DER already fingerprinted: re-serializing would re-sign
// with a fresh ECDSA nonce and produce a different certificate.
fn pem_encode(label: &str, der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut pem = format!("-----BEGIN {}-----\n", label);
    for line in encoded.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {}-----\n", label));
    pem
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}

fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)
}
