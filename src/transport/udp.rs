//! Datagram transport implementation.
//!
//! Two shapes:
//! - [`DatagramLink`]: a client socket connected to one server address.
//! - [`PeerLink`]: the server's shared socket seen from one peer. The
//!   server's accept loop is the only reader of the socket and routes each
//!   datagram into the owning peer's bounded inbox.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

use super::{not_connected, Link};
use crate::error::Result;

/// Inbox capacity for each server-side peer.
pub const PEER_INBOX_CAPACITY: usize = 64;

/// Client-side UDP link.
#[derive(Debug)]
pub struct DatagramLink {
    socket: UdpSocket,
    peer: SocketAddr,
    closed: AtomicBool,
}

/// Bind an ephemeral local socket and connect it to `addr`.
pub async fn connect_udp(addr: SocketAddr) -> Result<DatagramLink> {
    let local: SocketAddr = if addr.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let socket = UdpSocket::bind(local).await?;
    socket.connect(addr).await?;
    tracing::debug!("UDP socket {} bound for {}", socket.local_addr()?, addr);

    Ok(DatagramLink {
        socket,
        peer: addr,
        closed: AtomicBool::new(false),
    })
}

impl DatagramLink {
    /// Local socket address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl Link for DatagramLink {
    fn send<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(not_connected("udp"));
            }
            Ok(self.socket.send(data).await?)
        })
    }

    fn recv(&self, buffersize: usize) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(not_connected("udp"));
            }
            let mut buf = vec![0u8; buffersize];
            let n = self.socket.recv(&mut buf).await?;
            buf.truncate(n);
            Ok(Bytes::from(buf))
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
            Ok(())
        })
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn name(&self) -> &'static str {
        "udp"
    }
}

/// Server-side view of one UDP peer.
pub struct PeerLink {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    inbox: Mutex<mpsc::Receiver<Bytes>>,
    closed: AtomicBool,
}

impl PeerLink {
    /// Create a link for `peer` over the shared server `socket`.
    ///
    /// Returns the link and the sender the accept loop uses to route
    /// datagrams from `peer` into it.
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr) -> (Self, mpsc::Sender<Bytes>) {
        let (tx, rx) = mpsc::channel(PEER_INBOX_CAPACITY);
        let link = Self {
            socket,
            peer,
            inbox: Mutex::new(rx),
            closed: AtomicBool::new(false),
        };
        (link, tx)
    }
}

impl Link for PeerLink {
    fn send<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(not_connected("udp"));
            }
            Ok(self.socket.send_to(data, self.peer).await?)
        })
    }

    fn recv(&self, buffersize: usize) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(not_connected("udp"));
            }
            // A closed inbox reads as an empty datagram: the peer is gone.
            let datagram = self.inbox.lock().await.recv().await.unwrap_or_default();
            Ok(datagram.slice(..datagram.len().min(buffersize)))
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            // A reader blocked on the inbox holds the lock; it is woken when
            // the server drops the routing sender.
            if !self.closed.swap(true, Ordering::AcqRel) {
                if let Ok(mut inbox) = self.inbox.try_lock() {
                    inbox.close();
                }
            }
            Ok(())
        })
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn name(&self) -> &'static str {
        "udp"
    }
}
