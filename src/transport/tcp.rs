//! Stream transport implementation.
//!
//! A [`StreamLink`] owns the two halves of a byte stream behind separate
//! locks, so a pending read never blocks a concurrent write. The same type
//! carries plain TCP and TLS-over-TCP.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::client::TlsStream;

use super::{not_connected, Link};
use crate::error::{Result, SipError};

/// Plain TCP link.
pub type TcpLink = StreamLink<OwnedReadHalf, OwnedWriteHalf>;

/// TLS-over-TCP link.
pub type TlsLink = StreamLink<ReadHalf<TlsStream<TcpStream>>, WriteHalf<TlsStream<TcpStream>>>;

/// Link over any split byte stream.
pub struct StreamLink<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
    peer: SocketAddr,
    name: &'static str,
    closed: AtomicBool,
}

impl<R, W> StreamLink<R, W> {
    /// Create from already-split halves.
    pub fn from_halves(reader: R, writer: W, peer: SocketAddr, name: &'static str) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            peer,
            name,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(not_connected(self.name))
        } else {
            Ok(())
        }
    }
}

impl TcpLink {
    /// Wrap an accepted or connected TCP stream.
    pub fn tcp(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self::from_halves(reader, writer, peer, "tcp"))
    }
}

impl TlsLink {
    /// Wrap a completed TLS client stream.
    pub fn tls(stream: TlsStream<TcpStream>) -> Result<Self> {
        let peer = stream.get_ref().0.peer_addr()?;
        let (reader, writer) = tokio::io::split(stream);
        Ok(Self::from_halves(reader, writer, peer, "tls"))
    }
}

impl<R, W> Link for StreamLink<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn send<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            self.ensure_open()?;
            let mut writer = self.writer.lock().await;
            writer.write_all(data).await?;
            writer.flush().await?;
            Ok(data.len())
        })
    }

    fn recv(&self, buffersize: usize) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(async move {
            self.ensure_open()?;
            let mut buf = vec![0u8; buffersize];
            let n = self.reader.lock().await.read(&mut buf).await?;
            buf.truncate(n);
            Ok(Bytes::from(buf))
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            match self.writer.lock().await.shutdown().await {
                Ok(()) => Ok(()),
                // The peer may already have torn the stream down.
                Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
                Err(e) => Err(SipError::Io(e)),
            }
        })
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Open a TCP connection to `addr`, bounded by `timeout`.
pub async fn connect_tcp(addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    tracing::debug!("TCP connecting to {}", addr);

    tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| {
            SipError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {addr} timed out"),
            ))
        })?
        .map_err(SipError::Io)
}
