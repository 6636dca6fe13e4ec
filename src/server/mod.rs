//! Listening server.
//!
//! Binds a TCP listener or a UDP socket, accepts peers into a session table
//! keyed by remote address, and runs each session's loops as its own task so
//! accept throughput never waits on per-session I/O.
//!
//! # Lifecycle
//!
//! ```text
//! run ─▶ start ─▶ accept ─▶ accept ─▶ ... ─▶ (shutdown) ─▶ stop
//! ```
//!
//! For UDP there is no connection: the first datagram from a new address
//! creates its session, later datagrams from the same address are routed to
//! it. A datagram carrying the exit token winds its session down.
//!
//! Under [`Server::serve`] every new session gets a supervising task that
//! removes it from the table once it closes. Sessions without a receive loop
//! are also closed after [`ServerConfig::idle_timeout`] without traffic.
//!
//! # Example
//!
//! ```rust,ignore
//! use sipsock::server::{Server, ServerConfig};
//! use sipsock::transport::TransportKind;
//!
//! let server = Server::new(ServerConfig::new(TransportKind::Udp, "0.0.0.0", 5060))?;
//! server.run(tokio::signal::ctrl_c().map(|_| ())).await?;
//! ```

mod config;
mod logger;
mod state;

pub use config::{ServerConfig, DEFAULT_IDLE_TIMEOUT};
pub use logger::{session_logger, TIMESTAMP_FORMAT};
pub use state::SessionTable;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc::error::TrySendError;

use crate::error::Result;
use crate::notifier::{Event, Notifier, Observer, Subject};
use crate::session::{is_exit_token, LoopKind, Session};
use crate::transport::{not_connected, resolve, Link, PeerLink, TcpLink, TransportKind};

/// First pause after a failed accept
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
/// Longest pause between failed accepts
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause before retrying after `failures` consecutive accept errors.
fn accept_backoff(failures: u32) -> Duration {
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1u32 << failures.saturating_sub(1).min(16))
        .min(ACCEPT_BACKOFF_MAX)
}

#[derive(Clone)]
enum Listener {
    Tcp(Arc<TcpListener>),
    Udp(Arc<UdpSocket>),
}

/// A session handed out by [`Server::accept`].
#[derive(Debug, Clone)]
pub struct Accepted {
    /// The session
    pub session: Arc<Session>,
    /// `false` when a UDP datagram was routed to an existing session
    pub fresh: bool,
}

/// Listening server; a notifier subject.
pub struct Server {
    config: ServerConfig,
    notifier: Arc<Notifier>,
    listener: Mutex<Option<Listener>>,
    sessions: SessionTable,
    logger: Arc<Observer>,
}

impl Server {
    /// Create a server. Nothing is bound until [`Server::start`].
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let notifier = Arc::new(Notifier::new(Subject::Server { port: config.port }));
        Ok(Self {
            config,
            notifier,
            listener: Mutex::new(None),
            sessions: SessionTable::new(),
            logger: session_logger(),
        })
    }

    /// Get configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Event notifier
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Register an observer for server events.
    pub fn register(&self, observer: &Arc<Observer>) {
        self.notifier.register(observer);
    }

    /// Session table
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Session for `peer`, if any
    pub async fn session(&self, peer: &SocketAddr) -> Option<Arc<Session>> {
        self.sessions.get(peer).await
    }

    /// Number of sessions in the table
    pub async fn session_count(&self) -> usize {
        self.sessions.count().await
    }

    /// Bound address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.current_listener()? {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            Listener::Udp(socket) => socket.local_addr().ok(),
        }
    }

    fn current_listener(&self) -> Option<Listener> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Bind the listening endpoint. Starting twice is a no-op.
    pub async fn start(&self) -> Result<SocketAddr> {
        if let Some(local) = self.local_addr() {
            return Ok(local);
        }

        self.notifier.notify_all(&Event::WillStart);
        let addr = resolve(&self.config.host, self.config.port).await?;
        let (listener, local) = match self.config.kind {
            TransportKind::Tcp => {
                let listener = TcpListener::bind(addr).await?;
                let local = listener.local_addr()?;
                (Listener::Tcp(Arc::new(listener)), local)
            },
            TransportKind::Udp => {
                let socket = UdpSocket::bind(addr).await?;
                let local = socket.local_addr()?;
                (Listener::Udp(Arc::new(socket)), local)
            },
        };
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);

        tracing::info!("{} server listening on {}", self.config.kind, local);
        self.notifier.notify_all(&Event::DidStart { local });
        Ok(local)
    }

    /// Wait for one peer.
    ///
    /// TCP: accept one connection; an entry left over from an earlier
    /// connection with the same address is replaced and closed.
    /// UDP: receive one datagram; a known address reuses its session.
    pub async fn accept(&self) -> Result<Accepted> {
        let listener = self
            .current_listener()
            .ok_or_else(|| not_connected("server"))?;

        self.notifier.notify_all(&Event::WillAccept);
        let accepted = match listener {
            Listener::Tcp(listener) => self.accept_stream(&listener).await?,
            Listener::Udp(socket) => self.accept_datagram(&socket).await?,
        };

        if accepted.fresh {
            let peer = accepted.session.peer_addr();
            tracing::info!("accepted {} ({} sessions)", peer, self.session_count().await);
            self.notifier.notify_all(&Event::DidAccept { peer });
        }
        Ok(accepted)
    }

    async fn accept_stream(&self, listener: &TcpListener) -> Result<Accepted> {
        let (stream, _) = listener.accept().await?;
        let link: Arc<dyn Link> = Arc::new(TcpLink::tcp(stream)?);
        let session = Arc::new(Session::new(link, self.config.loops.clone()));
        self.prepare(&session)?;

        if let Some(stale) = self.sessions.insert(session.clone(), None).await {
            tracing::debug!("replacing stale session for {}", stale.peer_addr());
            if let Err(e) = stale.close().await {
                tracing::warn!("closing stale session failed: {}", e);
            }
        }

        Ok(Accepted {
            session,
            fresh: true,
        })
    }

    async fn accept_datagram(&self, socket: &Arc<UdpSocket>) -> Result<Accepted> {
        let buffersize = self.config.loops.buffersize;
        let mut buf = vec![0u8; buffersize];
        let (n, peer) = socket.recv_from(&mut buf).await?;
        buf.truncate(n);
        let datagram = Bytes::from(buf);

        let lookup = self
            .sessions
            .get_or_insert_with(peer, || {
                let (link, inbox) = PeerLink::new(socket.clone(), peer);
                let link: Arc<dyn Link> = Arc::new(link);
                (Arc::new(Session::new(link, self.config.loops.clone())), Some(inbox))
            })
            .await;
        if lookup.fresh {
            self.prepare(&lookup.session)?;
        }
        lookup.session.touch();

        if let Some(inbox) = &lookup.inbox {
            match inbox.try_send(datagram.clone()) {
                Ok(()) => {},
                Err(TrySendError::Full(_)) => {
                    tracing::debug!("inbox for {} is full, dropping datagram", peer);
                },
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!("session for {} no longer reads", peer);
                },
            }
        }
        let exit = is_exit_token(&datagram);
        lookup.session.notifier().notify_all(&Event::RecvSuccess {
            buffersize,
            message: datagram,
        });
        if exit {
            tracing::info!("{} requested exit", peer);
            lookup.session.begin_closing();
        }

        Ok(Accepted {
            session: lookup.session,
            fresh: lookup.fresh,
        })
    }

    fn prepare(&self, session: &Arc<Session>) -> Result<()> {
        session.activate()?;
        for kind in LoopKind::ALL {
            session.set_loop(kind, self.config.loop_enabled(kind));
        }
        if self.config.log_sessions {
            session.register(&self.logger);
        }
        Ok(())
    }

    /// Accept peers until an accept fails fatally.
    ///
    /// Each new session is driven by its own task, which removes the session
    /// from the table once it closes. Transient accept errors are retried
    /// after a growing pause.
    pub async fn serve(&self) -> Result<()> {
        let mut failures = 0u32;
        loop {
            let accepted = match self.accept().await {
                Ok(accepted) => accepted,
                Err(e) if self.current_listener().is_none() || e.is_setup_error() => return Err(e),
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let pause = accept_backoff(failures);
                    tracing::warn!("accept failed: {} (retrying in {:?})", e, pause);
                    tokio::time::sleep(pause).await;
                    continue;
                },
            };
            failures = 0;

            if accepted.fresh {
                self.spawn_session(accepted.session);
            }
        }
    }

    fn spawn_session(&self, session: Arc<Session>) {
        let table = self.sessions.clone();
        let runs_loops = self.config.runs_loops();
        let idle_limit = self.config.idle_limit();
        tokio::spawn(async move {
            let peer = session.peer_addr();
            if let Err(e) = supervise(&session, runs_loops, idle_limit).await {
                tracing::warn!("session {} ended with error: {}", peer, e);
            }
            table.remove_if(&peer, session.id()).await;
            tracing::debug!("session {} removed", peer);
        });
    }

    /// Close and remove the session for `peer`.
    pub async fn close_session(&self, peer: &SocketAddr) -> Result<bool> {
        match self.sessions.remove(peer).await {
            Some(session) => {
                session.close().await?;
                Ok(true)
            },
            None => Ok(false),
        }
    }

    /// Release the listener and close every session. Stopping twice is a
    /// no-op.
    pub async fn stop(&self) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if listener.is_none() {
            return Ok(());
        }

        self.notifier.notify_all(&Event::WillStop);
        let mut first_error = None;
        for session in self.sessions.drain().await {
            if let Err(e) = session.close().await {
                tracing::warn!("closing {} failed: {}", session.peer_addr(), e);
                first_error.get_or_insert(e);
            }
        }
        drop(listener);

        tracing::info!("server on port {} stopped", self.config.port);
        self.notifier.notify_all(&Event::DidStop);
        first_error.map_or(Ok(()), Err)
    }

    /// Start, accept until `shutdown` resolves, then stop.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.notifier.notify_all(&Event::WillRun);
        self.start().await?;

        let served = tokio::select! {
            result = self.serve() => result,
            () = shutdown => {
                tracing::info!("shutdown requested");
                Ok(())
            },
        };

        let stopped = self.stop().await;
        self.notifier.notify_all(&Event::DidRun);
        served.and(stopped)
    }
}

/// Drive `session` until it closes: run its loops, or wait for exit or
/// stop when it has none, racing the idle limit if one applies.
async fn supervise(session: &Arc<Session>, runs_loops: bool, idle_limit: Option<Duration>) -> Result<()> {
    let driven = async {
        if runs_loops {
            session.clone().run_loops().await
        } else {
            session.closed().await;
            session.close().await
        }
    };

    match idle_limit {
        Some(limit) => tokio::select! {
            result = driven => result,
            () = session.idle_expired(limit) => {
                tracing::info!("{} idle for {:?}, closing", session.peer_addr(), limit);
                session.close().await
            },
        },
        None => driven.await,
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("kind", &self.config.kind)
            .field("listen", &self.config.listen_addr())
            .field("local", &self.local_addr())
            .finish()
    }
}
