//! rustls client configuration from PEM files.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};

use crate::config::TlsConfig;
use crate::error::{ClientError, Result};

/// Build a rustls `ClientConfig` from our `TlsConfig`.
pub fn build_client_config(config: &TlsConfig) -> Result<ClientConfig> {
    let mut root_store = RootCertStore::empty();

    if let Some(ca_path) = &config.ca_cert {
        let certs = load_certs(ca_path, "CA cert")?;
        let (added, ignored) = root_store.add_parsable_certificates(certs);
        if added == 0 {
            return Err(ClientError::Tls(format!(
                "No usable CA certificate in {} ({} ignored)",
                ca_path.display(),
                ignored
            )));
        }
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    let builder = ClientConfig::builder().with_root_certificates(root_store);

    let tls_config = match (&config.client_cert, &config.client_key) {
        (Some(cert_path), Some(key_path)) => {
            let certs = load_certs(cert_path, "client cert")?;
            let key = load_private_key(key_path)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| ClientError::Tls(format!("Failed to configure client auth: {}", e)))?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(ClientError::Tls(
                "client_cert and client_key must be set together".to_string(),
            ))
        }
    };

    Ok(tls_config)
}

/// Name presented for SNI and checked against the server certificate.
pub fn server_name(config: &TlsConfig, host: &str) -> Result<ServerName<'static>> {
    let name = config.server_name.as_deref().unwrap_or(host);
    ServerName::try_from(name.to_string())
        .map_err(|_| ClientError::Tls(format!("Invalid server name: {}", name)))
}

fn load_certs(path: &Path, what: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| ClientError::Tls(format!("Failed to open {} {}: {}", what, path.display(), e)))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ClientError::Tls(format!("Failed to parse {}: {}", what, e)))?;
    if certs.is_empty() {
        return Err(ClientError::Tls(format!(
            "No certificate found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| ClientError::Tls(format!("Failed to open client key: {}", e)))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ClientError::Tls(format!("Failed to parse client key: {}", e)))?
        .ok_or_else(|| ClientError::Tls("No private key found in file".to_string()))
}
