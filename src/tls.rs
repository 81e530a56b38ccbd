//! TLS provisioning
//!
//! Loads the server certificate from the application directory, generating
//! a self-signed one on first start, and builds the rustls server config.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tracing::{debug, error, info, warn};

use crate::error::RendezvousError;

/// Certificate file inside the application directory
pub const CERT_FILE_NAME: &str = "puncher_cert.pem";

/// Private key file inside the application directory
pub const KEY_FILE_NAME: &str = "puncher_cert.key";

/// Names the generated certificate is valid for
pub const DEFAULT_SUBJECTS: &[&str] = &["localhost"];

/// PEM-encoded certificate and private key
#[derive(Debug, Clone)]
pub struct CertKeyPair {
    pub cert_pem: String,
    pub key_pem: String,
}

impl CertKeyPair {
    /// Certificate chain in DER form
    pub fn cert_chain(&self) -> Result<Vec<CertificateDer<'static>>> {
        let chain = CertificateDer::pem_slice_iter(self.cert_pem.as_bytes())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RendezvousError::tls_error_with_source("Invalid certificate PEM", e.to_string()))?;

        if chain.is_empty() {
            return Err(RendezvousError::tls_error("Certificate PEM contains no certificates").into());
        }
        Ok(chain)
    }

    /// Private key in DER form
    pub fn private_key(&self) -> Result<PrivateKeyDer<'static>> {
        PrivateKeyDer::from_pem_slice(self.key_pem.as_bytes())
            .map_err(|e| RendezvousError::tls_error_with_source("Invalid private key PEM", e.to_string()).into())
    }
}

/// Generate a self-signed certificate for `subjects`
pub fn generate_self_signed_cert(subjects: &[&str]) -> Result<CertKeyPair> {
    let subjects: Vec<String> = subjects.iter().map(|&s| s.to_string()).collect();

    let certified = rcgen::generate_simple_self_signed(subjects).map_err(|e| {
        error!("Failed to generate self-signed certificate: {}", e);
        RendezvousError::tls_error_with_source("Failed to generate self-signed certificate", e.to_string())
    })?;

    Ok(CertKeyPair {
        cert_pem: certified.cert.pem(),
        key_pem: certified.key_pair.serialize_pem(),
    })
}

/// Read the certificate pair from `app_dir`, or generate and persist a new
/// one when either file is missing.
pub fn load_or_generate(app_dir: &Path) -> Result<CertKeyPair> {
    let cert_path = app_dir.join(CERT_FILE_NAME);
    let key_path = app_dir.join(KEY_FILE_NAME);

    if cert_path.is_file() && key_path.is_file() {
        info!("Loading TLS certificate from {}", cert_path.display());
        let cert_pem = read_pem(&cert_path)?;
        let key_pem = read_pem(&key_path)?;
        return Ok(CertKeyPair { cert_pem, key_pem });
    }

    if cert_path.exists() || key_path.exists() {
        warn!("Incomplete certificate pair in {}, regenerating", app_dir.display());
    }

    fs::create_dir_all(app_dir).map_err(|e| {
        RendezvousError::tls_error_full("Failed to create application directory", app_dir.display().to_string(), e.to_string())
    })?;

    info!("Generating self-signed TLS certificate in {}", app_dir.display());
    let pair = generate_self_signed_cert(DEFAULT_SUBJECTS)?;
    write_pem(&cert_path, &pair.cert_pem)?;
    write_pem(&key_path, &pair.key_pem)?;
    restrict_permissions(&key_path);

    Ok(pair)
}

/// Build the rustls server config: ring provider, TLS 1.2 minimum, no client auth
pub fn build_server_config(pair: &CertKeyPair) -> Result<Arc<ServerConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| RendezvousError::tls_error_with_source("Unsupported protocol versions", e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(pair.cert_chain()?, pair.private_key()?)
        .map_err(|e| RendezvousError::tls_error_with_source("Failed to build server config", e.to_string()))?;

    debug!("TLS server config ready");
    Ok(Arc::new(config))
}

fn read_pem(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        error!("Failed to read '{}': {}", path.display(), e);
        RendezvousError::tls_error_full("Failed to read PEM file", path.display().to_string(), e.to_string()).into()
    })
}

fn write_pem(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).map_err(|e| {
        error!("Failed to write '{}': {}", path.display(), e);
        RendezvousError::tls_error_full("Failed to write PEM file", path.display().to_string(), e.to_string()).into()
    })
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        warn!("Could not restrict permissions on {}: {}", path.display(), e);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}
