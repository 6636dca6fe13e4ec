//! Client configuration.

use std::time::Duration;

use crate::error::{Result, SipError};
use crate::session::{LoopKind, LoopSettings};
use crate::transport::{TlsConfig, TransportKind};

/// Default connect/send/receive timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default maximum number of connect attempts.
pub const DEFAULT_MAX_TRIALS: u32 = 10;

/// Default pause between connect attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Transport kind
    pub kind: TransportKind,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Bound on connect, handshake, send and receive
    pub timeout: Duration,
    /// TLS wrapper (TCP only)
    pub tls: Option<TlsConfig>,
    /// Maximum connect attempts
    pub max_trials: u32,
    /// Pause between connect attempts
    pub retry_delay: Duration,
    /// Loop message, buffer size and periods
    pub loops: LoopSettings,
    /// Enable the send loop
    pub send_loop: bool,
    /// Enable the receive loop
    pub recv_loop: bool,
    /// Enable the sendrecv loop
    pub sendrecv_loop: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Tcp,
            host: "127.0.0.1".to_string(),
            port: 5060,
            timeout: DEFAULT_TIMEOUT,
            tls: None,
            max_trials: DEFAULT_MAX_TRIALS,
            retry_delay: DEFAULT_RETRY_DELAY,
            loops: LoopSettings::client(),
            send_loop: false,
            recv_loop: false,
            sendrecv_loop: false,
        }
    }
}

impl ClientConfig {
    /// Create a config targeting `host:port` over `kind`.
    pub fn new(kind: TransportKind, host: impl Into<String>, port: u16) -> Self {
        Self {
            kind,
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Wrap the TCP link in TLS
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Set connect retry budget
    pub fn with_retry(mut self, max_trials: u32, retry_delay: Duration) -> Self {
        self.max_trials = max_trials;
        self.retry_delay = retry_delay;
        self
    }

    /// Set loop settings
    pub fn with_loops(mut self, loops: LoopSettings) -> Self {
        self.loops = loops;
        self
    }

    /// Enable or disable one loop
    pub fn with_loop(mut self, kind: LoopKind, enabled: bool) -> Self {
        match kind {
            LoopKind::Send => self.send_loop = enabled,
            LoopKind::Recv => self.recv_loop = enabled,
            LoopKind::SendRecv => self.sendrecv_loop = enabled,
        }
        self
    }

    /// Whether `kind` is enabled
    pub fn loop_enabled(&self, kind: LoopKind) -> bool {
        match kind {
            LoopKind::Send => self.send_loop,
            LoopKind::Recv => self.recv_loop,
            LoopKind::SendRecv => self.sendrecv_loop,
        }
    }

    /// `host:port`
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject combinations that cannot work before any I/O happens.
    pub fn validate(&self) -> Result<()> {
        if self.tls.is_some() && self.kind == TransportKind::Udp {
            return Err(SipError::Config("TLS is only supported over TCP".to_string()));
        }
        if self.loops.buffersize == 0 {
            return Err(SipError::field("buffersize", "must be greater than zero"));
        }
        Ok(())
    }
}
