//! Outbound client.
//!
//! Connects to a server over UDP, TCP or TLS-over-TCP, retrying up to
//! `max_trials` times, and exposes message-level send/receive plus the
//! periodic loops.
//!
//! # Example
//!
//! ```rust,ignore
//! use sipsock::client::{Client, ClientConfig};
//! use sipsock::transport::TransportKind;
//!
//! let mut client = Client::new(ClientConfig::new(TransportKind::Tcp, "127.0.0.1", 5060))?;
//! client.connect().await?;
//! client.send(b"INVITE sip:bob@127.0.0.1 SIP/2.0\r\n\r\n\r\n").await?;
//! let reply = client.recv(1024).await?;
//! client.disconnect().await?;
//! ```

mod config;

pub use config::{ClientConfig, DEFAULT_MAX_TRIALS, DEFAULT_RETRY_DELAY, DEFAULT_TIMEOUT};

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Result, SipError};
use crate::notifier::{Event, Notifier, Observer, Subject};
use crate::session::{LoopKind, Session};
use crate::transport::{
    connect_tcp, connect_tls, connect_udp, not_connected, resolve, Link, TcpLink, TransportKind,
};

/// Outbound client; a notifier subject.
pub struct Client {
    config: ClientConfig,
    notifier: Arc<Notifier>,
    session: Option<Arc<Session>>,
    trial_count: u32,
}

impl Client {
    /// Create a client. Fails on an unusable configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let notifier = Arc::new(Notifier::new(Subject::Client {
            target: config.target(),
        }));
        Ok(Self {
            config,
            notifier,
            session: None,
            trial_count: 0,
        })
    }

    /// Get configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Event notifier, shared with the connected session
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Register an observer for client and session events.
    pub fn register(&self, observer: &Arc<Observer>) {
        self.notifier.register(observer);
    }

    /// Attempts made by the last `connect`
    pub fn trial_count(&self) -> u32 {
        self.trial_count
    }

    /// Current session, if connected
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// Whether the current session is active
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_alive())
    }

    /// Connect, retrying until `max_trials` attempts have failed.
    ///
    /// An existing session is closed first.
    pub async fn connect(&mut self) -> Result<Arc<Session>> {
        if self.session.is_some() {
            self.disconnect().await?;
        }

        let max_trials = self.config.max_trials.max(1);
        self.trial_count = 0;

        let link = loop {
            self.trial_count += 1;
            self.notifier.notify_all(&Event::WillConnect {
                attempt: self.trial_count,
            });

            match self.open_link().await {
                Ok(link) => break link,
                Err(e) if e.is_setup_error() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "connect to {} failed (attempt {}/{}): {}",
                        self.config.target(),
                        self.trial_count,
                        max_trials,
                        e
                    );
                    if self.trial_count >= max_trials {
                        return Err(SipError::Connect {
                            attempts: self.trial_count,
                            reason: e.to_string(),
                        });
                    }
                    tokio::time::sleep(self.config.retry_delay).await;
                },
            }
        };

        let peer = link.peer_addr();
        let session = Arc::new(
            Session::with_notifier(link, self.config.loops.clone(), self.notifier.clone())
                .with_timeout(Some(self.config.timeout)),
        );
        session.activate()?;
        for kind in LoopKind::ALL {
            session.set_loop(kind, self.config.loop_enabled(kind));
        }

        tracing::info!(
            "connected to {} over {} after {} attempt(s)",
            peer,
            self.config.kind,
            self.trial_count
        );
        self.notifier.notify_all(&Event::DidConnect { peer });
        self.session = Some(session.clone());
        Ok(session)
    }

    async fn open_link(&self) -> Result<Arc<dyn Link>> {
        let addr = resolve(&self.config.host, self.config.port).await?;
        let link: Arc<dyn Link> = match (self.config.kind, &self.config.tls) {
            (TransportKind::Udp, _) => Arc::new(connect_udp(addr).await?),
            (TransportKind::Tcp, None) => {
                Arc::new(TcpLink::tcp(connect_tcp(addr, self.config.timeout).await?)?)
            },
            (TransportKind::Tcp, Some(tls)) => {
                Arc::new(connect_tls(&self.config.host, addr, self.config.timeout, tls).await?)
            },
        };
        Ok(link)
    }

    fn active_session(&self) -> Result<&Arc<Session>> {
        self.session.as_ref().ok_or_else(|| not_connected("client"))
    }

    /// Send `data` over the connected session.
    pub async fn send(&self, data: &[u8]) -> Result<usize> {
        self.active_session()?.send(data).await
    }

    /// Receive at most `buffersize` bytes.
    pub async fn recv(&self, buffersize: usize) -> Result<Bytes> {
        self.active_session()?.recv(buffersize).await
    }

    /// Send the loop message, then receive once.
    pub async fn sendrecv(&self) -> Result<Bytes> {
        self.active_session()?.sendrecv().await
    }

    /// Connect, run every enabled loop to completion, then disconnect.
    pub async fn run(&mut self) -> Result<()> {
        let session = self.connect().await?;
        let result = session.run_loops().await;
        self.disconnect().await?;
        result
    }

    /// Close the session, if any. Repeat calls are no-ops.
    pub async fn disconnect(&mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => {
                tracing::debug!("disconnecting from {}", session.peer_addr());
                session.close().await
            },
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("target", &self.config.target())
            .field("kind", &self.config.kind)
            .field("trial_count", &self.trial_count)
            .field("session", &self.session)
            .finish()
    }
}
