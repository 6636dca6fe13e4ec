//! Transport configuration for the TLS wrapper.
//!
//! Handles protocol-version selection and trust roots. Without a CA
//! bundle the server certificate is accepted as-is, matching plain
//! socket wrapping without verification; with one, the chain is
//! verified against that bundle.

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, RootCertStore, ServerName};

use crate::error::{Result, SipError};

/// Supported TLS protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Order in which `all` tries the versions.
    pub const PREFERENCE: [TlsVersion; 2] = [TlsVersion::Tls13, TlsVersion::Tls12];

    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tls12 => "tlsv12",
            Self::Tls13 => "tlsv13",
        }
    }

    fn protocol(self) -> &'static rustls::SupportedProtocolVersion {
        match self {
            Self::Tls12 => &rustls::version::TLS12,
            Self::Tls13 => &rustls::version::TLS13,
        }
    }
}

/// Version selector given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsSelector {
    /// Exactly one version.
    Only(TlsVersion),
    /// Try every supported version in [`TlsVersion::PREFERENCE`] order.
    All,
}

impl TlsSelector {
    /// Versions to attempt, in order.
    pub fn candidates(&self) -> Vec<TlsVersion> {
        match self {
            Self::Only(version) => vec![*version],
            Self::All => TlsVersion::PREFERENCE.to_vec(),
        }
    }
}

impl FromStr for TlsSelector {
    type Err = SipError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tlsv12" | "tls12" | "1.2" => Ok(Self::Only(TlsVersion::Tls12)),
            "tlsv13" | "tls13" | "1.3" => Ok(Self::Only(TlsVersion::Tls13)),
            "all" => Ok(Self::All),
            _ => Err(SipError::Config(format!("invalid ssl version: {s}"))),
        }
    }
}

/// TLS wrapper configuration.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Version selector.
    pub selector: TlsSelector,
    /// PEM bundle of trusted CA certificates (verification off when absent).
    pub ca_file: Option<PathBuf>,
    /// Name presented for SNI/verification (defaults to the target host).
    pub server_name: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            selector: TlsSelector::All,
            ca_file: None,
            server_name: None,
        }
    }
}

impl TlsConfig {
    /// Create with the given selector and no verification.
    pub fn new(selector: TlsSelector) -> Self {
        Self {
            selector,
            ..Default::default()
        }
    }

    /// Verify the server against a CA bundle.
    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Override the server name.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Load the trust roots from `ca_file`.
    fn load_roots(&self) -> Result<Option<RootCertStore>> {
        let Some(path) = &self.ca_file else {
            return Ok(None);
        };

        let pem = fs::read(path).map_err(|e| {
            SipError::Config(format!("Failed to read CA file {:?}: {}", path, e))
        })?;

        let certs = rustls_pemfile::certs(&mut pem.as_slice())
            .map_err(|e| SipError::Config(format!("Failed to parse CA PEM: {}", e)))?;

        if certs.is_empty() {
            return Err(SipError::Config(
                "No certificates found in CA file".to_string(),
            ));
        }

        let mut roots = RootCertStore::empty();
        for der in certs {
            roots
                .add(&Certificate(der))
                .map_err(|e| SipError::Tls(format!("invalid CA certificate: {e}")))?;
        }
        Ok(Some(roots))
    }

    /// Build a rustls client config pinned to `version`.
    pub fn build_client_config(&self, version: TlsVersion) -> Result<Arc<ClientConfig>> {
        let builder = ClientConfig::builder()
            .with_safe_default_cipher_suites()
            .with_safe_default_kx_groups()
            .with_protocol_versions(&[version.protocol()])?;

        let config = match self.load_roots()? {
            Some(roots) => builder.with_root_certificates(roots).with_no_client_auth(),
            None => builder
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
                .with_no_client_auth(),
        };

        Ok(Arc::new(config))
    }

    /// Server name to present for `host`.
    pub fn server_name_for(&self, host: &str) -> Result<ServerName> {
        let name = self.server_name.as_deref().unwrap_or(host);
        if let Ok(ip) = name.parse::<std::net::IpAddr>() {
            return Ok(ServerName::IpAddress(ip));
        }
        ServerName::try_from(name)
            .map_err(|e| SipError::Config(format!("invalid TLS server name {name}: {e}")))
    }
}

/// Accepts any server certificate.
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}
