//! Server configuration.

use std::time::Duration;

use crate::error::{Result, SipError};
use crate::session::{LoopKind, LoopSettings};
use crate::transport::TransportKind;

/// Idle limit for sessions nothing reads from
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Transport kind
    pub kind: TransportKind,
    /// Bind host
    pub host: String,
    /// Bind port (0 picks an ephemeral port)
    pub port: u16,
    /// Per-session loop message, buffer size and periods
    pub loops: LoopSettings,
    /// Enable each session's send loop
    pub send_loop: bool,
    /// Enable each session's receive loop (ignored for UDP)
    pub recv_loop: bool,
    /// Close a session without a receive loop once it saw no I/O for this
    /// long. `None` keeps it until exit or stop.
    pub idle_timeout: Option<Duration>,
    /// Log every send/receive with a timestamp
    pub log_sessions: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Tcp,
            host: "127.0.0.1".to_string(),
            port: 5060,
            loops: LoopSettings::server(),
            send_loop: false,
            recv_loop: true,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            log_sessions: true,
        }
    }
}

impl ServerConfig {
    /// Create a config binding `host:port` over `kind`.
    pub fn new(kind: TransportKind, host: impl Into<String>, port: u16) -> Self {
        Self {
            kind,
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Bind to all interfaces
    pub fn bind_all(mut self) -> Self {
        self.host = "0.0.0.0".to_string();
        self
    }

    /// Set loop settings
    pub fn with_loops(mut self, loops: LoopSettings) -> Self {
        self.loops = loops;
        self
    }

    /// Enable or disable one session loop. `SendRecv` is client-only.
    pub fn with_loop(mut self, kind: LoopKind, enabled: bool) -> Self {
        match kind {
            LoopKind::Send => self.send_loop = enabled,
            LoopKind::Recv => self.recv_loop = enabled,
            LoopKind::SendRecv => {},
        }
        self
    }

    /// Set or clear the idle limit
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Idle limit applied to accepted sessions.
    ///
    /// A running receive loop notices a peer going away by itself, so only
    /// sessions without one are evicted for idleness.
    pub fn idle_limit(&self) -> Option<Duration> {
        if self.loop_enabled(LoopKind::Recv) {
            None
        } else {
            self.idle_timeout
        }
    }

    /// Disable session logging
    pub fn without_logging(mut self) -> Self {
        self.log_sessions = false;
        self
    }

    /// Whether sessions run `kind`.
    ///
    /// UDP sessions never run a receive loop: the accept loop is the only
    /// reader of the shared socket.
    pub fn loop_enabled(&self, kind: LoopKind) -> bool {
        match kind {
            LoopKind::Send => self.send_loop,
            LoopKind::Recv => self.recv_loop && self.kind == TransportKind::Tcp,
            LoopKind::SendRecv => false,
        }
    }

    /// Whether accepted sessions get a loop task at all
    pub fn runs_loops(&self) -> bool {
        LoopKind::ALL.iter().any(|kind| self.loop_enabled(*kind))
    }

    /// `host:port`
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject unusable values before binding.
    pub fn validate(&self) -> Result<()> {
        if self.loops.buffersize == 0 {
            return Err(SipError::field("buffersize", "must be greater than zero"));
        }
        if self.idle_timeout == Some(Duration::ZERO) {
            return Err(SipError::field("idle_timeout", "must be greater than zero"));
        }
        Ok(())
    }
}
