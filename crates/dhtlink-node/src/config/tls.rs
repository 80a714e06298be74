//! TLS configuration.

use std::path::PathBuf;

use serde::Deserialize;

/// TLS configuration.
///
/// Without `ca_cert` the bundled webpki roots are trusted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Disable only for local test brokers.
    pub enabled: bool,
    /// Root CA certificate (PEM).
    pub ca_cert: Option<PathBuf>,
    /// Device certificate (PEM).
    pub client_cert: Option<PathBuf>,
    /// Device private key (PEM).
    pub client_key: Option<PathBuf>,
    /// Override for SNI and certificate name checks.
    pub server_name: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ca_cert: None,
            client_cert: None,
            client_key: None,
            server_name: None,
        }
    }
}

impl TlsConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        match (&self.client_cert, &self.client_key) {
            (Some(_), None) => {
                return Err("tls.client_cert is set but tls.client_key is missing".to_string())
            }
            (None, Some(_)) => {
                return Err("tls.client_key is set but tls.client_cert is missing".to_string())
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn to_client(&self) -> dhtlink_client::TlsConfig {
        dhtlink_client::TlsConfig {
            enabled: self.enabled,
            ca_cert: self.ca_cert.clone(),
            client_cert: self.client_cert.clone(),
            client_key: self.client_key.clone(),
            server_name: self.server_name.clone(),
        }
    }
}
