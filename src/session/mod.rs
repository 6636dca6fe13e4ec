//! Session management for sipsock.
//!
//! A [`Session`] wraps one established [`Link`]: the server creates one per
//! accepted peer, the client creates one per successful connect. It owns the
//! loop enable flags, the liveness flag and the lifecycle state machine.
//!
//! # State Machine
//!
//! ```text
//! Created ──activate──▶ Active ──(empty read | exit token | I/O error)──▶ Closing ──close──▶ Closed
//! ```
//!
//! There is no way back to `Active`. `close` is idempotent and may be called
//! from any state.

mod loops;

pub use loops::{LoopKind, LoopSettings};

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::{Result, SipError};
use crate::notifier::{Event, Notifier, Observer, Subject};
use crate::transport::Link;

/// Payload that asks the receiving side to wind the session down.
pub const EXIT_TOKEN: &str = "exit";

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Link established, not yet activated
    Created,
    /// Ready for send/receive
    Active,
    /// Winding down; no further I/O
    Closing,
    /// Link released
    Closed,
}

/// Send/receive statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Messages sent
    pub messages_sent: u64,
    /// Messages received
    pub messages_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
}

struct LoopFlags {
    send: watch::Sender<bool>,
    recv: watch::Sender<bool>,
    sendrecv: watch::Sender<bool>,
}

impl LoopFlags {
    fn new() -> Self {
        Self {
            send: watch::Sender::new(false),
            recv: watch::Sender::new(false),
            sendrecv: watch::Sender::new(false),
        }
    }

    fn get(&self, kind: LoopKind) -> &watch::Sender<bool> {
        match kind {
            LoopKind::Send => &self.send,
            LoopKind::Recv => &self.recv,
            LoopKind::SendRecv => &self.sendrecv,
        }
    }
}

/// One peer connection.
pub struct Session {
    /// Session ID
    id: String,
    link: Arc<dyn Link>,
    notifier: Arc<Notifier>,
    state: Mutex<SessionState>,
    /// Dropped to `false` when the session leaves `Active`
    alive: watch::Sender<bool>,
    flags: LoopFlags,
    settings: LoopSettings,
    /// Bound on each send/receive
    timeout: Option<Duration>,
    /// Set once the link has been released
    released: AtomicBool,
    /// Last successful send, receive or routed datagram
    last_activity: Mutex<Instant>,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl Session {
    /// Create a session over `link` with its own notifier.
    pub fn new(link: Arc<dyn Link>, settings: LoopSettings) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let notifier = Arc::new(Notifier::new(Subject::Session {
            id: id.clone(),
            peer: link.peer_addr(),
        }));
        Self::build(id, link, notifier, settings)
    }

    /// Create a session that broadcasts through an existing notifier.
    ///
    /// The client uses this so its observers see session I/O events.
    pub fn with_notifier(link: Arc<dyn Link>, settings: LoopSettings, notifier: Arc<Notifier>) -> Self {
        Self::build(uuid::Uuid::new_v4().to_string(), link, notifier, settings)
    }

    fn build(id: String, link: Arc<dyn Link>, notifier: Arc<Notifier>, settings: LoopSettings) -> Self {
        Self {
            id,
            link,
            notifier,
            state: Mutex::new(SessionState::Created),
            alive: watch::Sender::new(false),
            flags: LoopFlags::new(),
            settings,
            timeout: None,
            released: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    /// Bound every send/receive by `timeout`. A timeout is an I/O error.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remote address
    pub fn peer_addr(&self) -> SocketAddr {
        self.link.peer_addr()
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the session is `Active`
    pub fn is_alive(&self) -> bool {
        *self.alive.borrow()
    }

    /// Loop settings
    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Event notifier of this session
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Register an observer for this session's events.
    pub fn register(&self, observer: &Arc<Observer>) {
        self.notifier.register(observer);
    }

    /// Get statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }

    /// Move `Created → Active`.
    pub fn activate(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != SessionState::Created {
            return Err(SipError::SessionInactive(*state));
        }
        *state = SessionState::Active;
        self.alive.send_replace(true);
        tracing::debug!("session {} active ({} {})", self.id, self.link.name(), self.peer_addr());
        Ok(())
    }

    /// Enable or disable one loop. Disabling wakes a running loop.
    pub fn set_loop(&self, kind: LoopKind, enabled: bool) {
        self.flags.get(kind).send_replace(enabled);
    }

    /// Whether `kind` is enabled.
    pub fn loop_enabled(&self, kind: LoopKind) -> bool {
        *self.flags.get(kind).borrow()
    }

    pub(crate) fn loop_flag(&self, kind: LoopKind) -> &watch::Sender<bool> {
        self.flags.get(kind)
    }

    pub(crate) fn alive_flag(&self) -> &watch::Sender<bool> {
        &self.alive
    }

    /// Time since the last successful I/O on this session.
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub(crate) fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Resolve once the session has left `Active`.
    pub async fn closed(&self) {
        let mut alive = self.alive.subscribe();
        let _ = alive.wait_for(|on| !*on).await;
    }

    /// Resolve once no I/O happened for `limit`.
    pub(crate) async fn idle_expired(&self, limit: Duration) {
        loop {
            let idle = self.idle_for();
            if idle >= limit {
                return;
            }
            tokio::time::sleep(limit - idle).await;
        }
    }

    /// Send `data` in full.
    pub async fn send(&self, data: &[u8]) -> Result<usize> {
        self.ensure_active()?;
        let message = Bytes::copy_from_slice(data);
        self.notifier.notify_all(&Event::Sending {
            message: message.clone(),
        });

        match self.bounded(self.link.send(data)).await {
            Ok(n) => {
                self.messages_sent.fetch_add(1, Ordering::Relaxed);
                self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                self.touch();
                tracing::debug!("{} sent {} bytes", self.peer_addr(), n);
                self.notifier.notify_all(&Event::SendSuccess { message });
                Ok(n)
            },
            Err(e) => {
                tracing::warn!("{} send failed: {}", self.peer_addr(), e);
                self.notifier.notify_all(&Event::SendFailure {
                    message,
                    error: e.to_string(),
                });
                self.begin_closing();
                Err(e)
            },
        }
    }

    /// Receive at most `buffersize` bytes.
    ///
    /// An empty read fails with [`SipError::PeerClosed`]. A payload equal to
    /// [`EXIT_TOKEN`] is returned but moves the session to `Closing`.
    pub async fn recv(&self, buffersize: usize) -> Result<Bytes> {
        self.ensure_active()?;
        self.notifier.notify_all(&Event::Receiving { buffersize });

        match self.bounded(self.link.recv(buffersize)).await {
            Ok(message) if message.is_empty() => {
                tracing::info!("{} closed the connection", self.peer_addr());
                self.fail_recv(buffersize, SipError::PeerClosed)
            },
            Ok(message) => {
                self.messages_received.fetch_add(1, Ordering::Relaxed);
                self.bytes_received
                    .fetch_add(message.len() as u64, Ordering::Relaxed);
                self.touch();
                tracing::debug!("{} received {} bytes", self.peer_addr(), message.len());
                self.notifier.notify_all(&Event::RecvSuccess {
                    buffersize,
                    message: message.clone(),
                });
                if is_exit_token(&message) {
                    tracing::info!("{} requested exit", self.peer_addr());
                    self.begin_closing();
                }
                Ok(message)
            },
            Err(e) => {
                tracing::warn!("{} receive failed: {}", self.peer_addr(), e);
                self.fail_recv(buffersize, e)
            },
        }
    }

    /// Send the loop message, then receive once.
    pub async fn sendrecv(&self) -> Result<Bytes> {
        self.send(self.settings.message.as_bytes()).await?;
        self.recv(self.settings.buffersize).await
    }

    /// Release the link. Repeat calls are no-ops.
    pub async fn close(&self) -> Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.set_state(SessionState::Closing);
        self.notifier.notify_all(&Event::Closing);

        let result = self.link.close().await;
        self.set_state(SessionState::Closed);

        match result {
            Ok(()) => {
                tracing::debug!("session {} closed ({})", self.id, self.peer_addr());
                self.notifier.notify_all(&Event::CloseSuccess);
                Ok(())
            },
            Err(e) => {
                tracing::warn!("session {} close failed: {}", self.id, e);
                self.notifier.notify_all(&Event::CloseFailure {
                    error: e.to_string(),
                });
                Err(e)
            },
        }
    }

    /// Run every enabled loop to completion, then close.
    pub async fn run_loops(self: Arc<Self>) -> Result<()> {
        let mut tasks = JoinSet::new();
        for kind in LoopKind::ALL {
            if self.loop_enabled(kind) {
                tasks.spawn(loops::run(self.clone(), kind));
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("session {} loop task failed: {}", self.id, e);
            }
        }

        self.close().await
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state() {
            SessionState::Active => Ok(()),
            state => Err(SipError::SessionInactive(state)),
        }
    }

    fn fail_recv(&self, buffersize: usize, error: SipError) -> Result<Bytes> {
        self.notifier.notify_all(&Event::RecvFailure {
            buffersize,
            error: error.to_string(),
        });
        self.begin_closing();
        Err(error)
    }

    /// `Active → Closing`; other states are left alone.
    pub(crate) fn begin_closing(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == SessionState::Active {
                *state = SessionState::Closing;
            }
        }
        self.alive.send_replace(false);
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
        if next != SessionState::Active {
            self.alive.send_replace(false);
        }
    }

    async fn bounded<T>(&self, op: BoxFuture<'_, Result<T>>) -> Result<T> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, op).await.map_err(|_| {
                SipError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no progress within {limit:?}"),
                ))
            })?,
            None => op.await,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("link", &self.link.name())
            .field("peer", &self.peer_addr())
            .field("state", &self.state())
            .finish()
    }
}

/// Whether `payload` is the reserved exit token.
pub fn is_exit_token(payload: &[u8]) -> bool {
    std::str::from_utf8(payload).is_ok_and(|text| text.trim() == EXIT_TOKEN)
}
