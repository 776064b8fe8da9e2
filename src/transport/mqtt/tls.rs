//! Mutual TLS provisioning
//!
//! Turns a CA bundle, a client certificate chain and a (possibly encrypted) client
//! private key into a rustls client configuration for rumqttc. Certificates are read
//! with `rustls-pemfile`; the key goes through OpenSSL so that passphrase protected
//! PKCS#8 and traditional PEM keys are both accepted.

use openssl::pkey::PKey;
use rumqttc::tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rumqttc::tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use rumqttc::{TlsConfiguration, Transport};
use std::fmt;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Certificate material for one client identity. Read-only once built.
#[derive(Clone, PartialEq)]
pub struct TlsMaterial {
    pub ca_cert_path: PathBuf,
    pub client_cert_path: PathBuf,
    pub client_key_path: PathBuf,
    pub key_passphrase: String,
}

impl TlsMaterial {
    /// Resolve the three file names against a resources directory
    pub fn in_dir<P: AsRef<Path>>(
        dir: P,
        ca_cert: &str,
        client_cert: &str,
        client_key: &str,
        key_passphrase: String,
    ) -> Self {
        let dir = dir.as_ref();
        Self {
            ca_cert_path: dir.join(ca_cert),
            client_cert_path: dir.join(client_cert),
            client_key_path: dir.join(client_key),
            key_passphrase,
        }
    }
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_cert_path", &self.ca_cert_path)
            .field("client_cert_path", &self.client_cert_path)
            .field("client_key_path", &self.client_key_path)
            .field("key_passphrase", &"***")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("No PEM certificates found in {0}")]
    NoCertificates(PathBuf),
    #[error("Invalid CA certificate in {path}: {source}")]
    InvalidCaCertificate {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },
    #[error("Unable to load private key {path} (malformed or wrong passphrase): {source}")]
    InvalidPrivateKey {
        path: PathBuf,
        #[source]
        source: openssl::error::ErrorStack,
    },
    #[error("Client certificate/key pair rejected: {0}")]
    InvalidIdentity(#[source] rustls::Error),
}

/// Builds TLS transports from [`TlsMaterial`]. Stateless.
pub struct TlsProvisioner;

impl TlsProvisioner {
    /// Transport for rumqttc trusting only the configured CA
    pub fn build_transport(material: &TlsMaterial) -> Result<Transport, TlsError> {
        let config = Self::build_client_config(material)?;
        Ok(Transport::tls_with_config(TlsConfiguration::Rustls(
            Arc::new(config),
        )))
    }

    pub fn build_client_config(material: &TlsMaterial) -> Result<ClientConfig, TlsError> {
        let roots = Self::load_root_store(&material.ca_cert_path)?;
        let chain = Self::load_certificates(&material.client_cert_path)?;
        let key = Self::load_private_key(&material.client_key_path, &material.key_passphrase)?;

        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(chain, key)
            .map_err(TlsError::InvalidIdentity)
    }

    fn load_root_store(path: &Path) -> Result<RootCertStore, TlsError> {
        let mut roots = RootCertStore::empty();
        for cert in Self::load_certificates(path)? {
            roots
                .add(cert)
                .map_err(|source| TlsError::InvalidCaCertificate {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        Ok(roots)
    }

    fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
        let pem = read_file(path)?;
        let mut reader = BufReader::new(pem.as_slice());
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| TlsError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        if certs.is_empty() {
            return Err(TlsError::NoCertificates(path.to_path_buf()));
        }
        Ok(certs)
    }

    fn load_private_key(path: &Path, passphrase: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
        let pem = read_file(path)?;
        let invalid = |source: openssl::error::ErrorStack| TlsError::InvalidPrivateKey {
            path: path.to_path_buf(),
            source,
        };

        // OpenSSL only consults the passphrase when the PEM block is encrypted
        let key = PKey::private_key_from_pem_passphrase(&pem, passphrase.as_bytes())
            .map_err(invalid)?;
        let der = key.private_key_to_pkcs8().map_err(invalid)?;

        Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(der)))
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}
