//! TLS wrapper for TCP links.
//!
//! Each candidate version gets a fresh TCP connection, since a failed
//! handshake leaves the stream unusable.

use std::net::SocketAddr;
use std::time::Duration;

use tokio_rustls::TlsConnector;

use super::config::{TlsConfig, TlsVersion};
use super::tcp::{connect_tcp, TlsLink};
use crate::error::{Result, SipError};

/// Connect to `addr` and complete a TLS handshake with the first version
/// in `config.selector` that succeeds.
///
/// When every candidate fails, the last error is returned.
pub async fn connect_tls(
    host: &str,
    addr: SocketAddr,
    timeout: Duration,
    config: &TlsConfig,
) -> Result<TlsLink> {
    let server_name = config.server_name_for(host)?;
    let mut last_err = None;

    for version in config.selector.candidates() {
        match handshake(addr, timeout, config, version, server_name.clone()).await {
            Ok(link) => {
                tracing::info!("TLS established with {} using {}", addr, version.name());
                return Ok(link);
            },
            Err(e) => {
                tracing::debug!("TLS {} handshake with {} failed: {}", version.name(), addr, e);
                last_err = Some(e);
            },
        }
    }

    Err(last_err.unwrap_or_else(|| SipError::Tls("no TLS version to try".to_string())))
}

async fn handshake(
    addr: SocketAddr,
    timeout: Duration,
    config: &TlsConfig,
    version: TlsVersion,
    server_name: rustls::ServerName,
) -> Result<TlsLink> {
    let connector = TlsConnector::from(config.build_client_config(version)?);
    let stream = connect_tcp(addr, timeout).await?;

    let tls = tokio::time::timeout(timeout, connector.connect(server_name, stream))
        .await
        .map_err(|_| SipError::Tls(format!("{} handshake timed out", version.name())))?
        .map_err(|e| SipError::Tls(format!("{} handshake failed: {}", version.name(), e)))?;

    TlsLink::tls(tls)
}
