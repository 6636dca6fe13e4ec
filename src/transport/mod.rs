//! Transport layer abstraction for sipsock.
//!
//! Provides pluggable link backends including:
//! - **TCP**: stream socket, split into independent read/write halves
//! - **TLS over TCP**: the TCP link wrapped in an encrypted channel
//! - **UDP**: connected datagram socket (client side) or a shared
//!   server socket with a per-peer inbox (server side)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Client / Server / Session        │
//! │         (Transport-Agnostic)            │
//! └──────────────────┬──────────────────────┘
//!                    │  Arc<dyn Link>
//!          ┌─────────┼──────────┬──────────────┐
//!          ▼         ▼          ▼              ▼
//!     ┌─────────┐ ┌─────────┐ ┌──────────────┐ ┌──────────┐
//!     │ TcpLink │ │ TlsLink │ │ DatagramLink │ │ PeerLink │
//!     └─────────┘ └─────────┘ └──────────────┘ └──────────┘
//! ```
//!
//! Every [`Link`] method takes `&self`, so a send loop and a receive loop
//! can drive the same link concurrently.

mod config;
mod tcp;
mod tls;
mod udp;

pub use config::{TlsConfig, TlsSelector, TlsVersion};
pub use tcp::{connect_tcp, StreamLink, TcpLink, TlsLink};
pub use tls::connect_tls;
pub use udp::{connect_udp, DatagramLink, PeerLink};

use std::net::SocketAddr;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::error::{Result, SipError};

/// Transport kind selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Datagram transport
    Udp,
    /// Stream transport (default)
    #[default]
    Tcp,
}

impl TransportKind {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = SipError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            _ => Err(SipError::ProtocolMismatch(format!("unknown protocol: {s}"))),
        }
    }
}

/// One established bidirectional byte channel to a single peer.
///
/// Implementations handle the socket specifics while sessions stay
/// transport-agnostic.
pub trait Link: Send + Sync {
    /// Send `data` in full. Returns the number of bytes sent.
    fn send<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<usize>>;

    /// Receive at most `buffersize` bytes. An empty result means the peer
    /// closed the channel.
    fn recv(&self, buffersize: usize) -> BoxFuture<'_, Result<Bytes>>;

    /// Release the underlying handle. Repeated calls are no-ops.
    fn close(&self) -> BoxFuture<'_, Result<()>>;

    /// Remote address.
    fn peer_addr(&self) -> SocketAddr;

    /// Get the link name for logging.
    fn name(&self) -> &'static str;
}

/// Resolve `host:port` to the first socket address.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| SipError::Config(format!("cannot resolve address {host}:{port}")))
}

pub(crate) fn not_connected(name: &str) -> SipError {
    SipError::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        format!("{name} link is closed"),
    ))
}
