//! Periodic send/receive loops.
//!
//! Each enabled loop runs as its own task. A loop stops on its first I/O
//! error, when its enable flag drops, or when the session stops being
//! alive; flag changes wake a loop that is sleeping or blocked on the
//! link.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::Session;
use crate::error::Result;

/// Which loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKind {
    /// Send the loop message every `period_send`.
    Send,
    /// Receive up to `buffersize` bytes every `period_recv`.
    Recv,
    /// Send the loop message then receive once, every `period_sendrecv`.
    SendRecv,
}

impl LoopKind {
    /// All loop kinds.
    pub const ALL: [LoopKind; 3] = [LoopKind::Send, LoopKind::Recv, LoopKind::SendRecv];

    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Recv => "recv",
            Self::SendRecv => "sendrecv",
        }
    }
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Loop payload and timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSettings {
    /// Message sent by the send and sendrecv loops.
    pub message: String,
    /// Receive buffer size.
    pub buffersize: usize,
    /// Send loop period.
    pub period_send: Duration,
    /// Receive loop period.
    pub period_recv: Duration,
    /// Sendrecv loop period.
    pub period_sendrecv: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::server()
    }
}

impl LoopSettings {
    /// Server-side session defaults.
    pub fn server() -> Self {
        Self {
            message: "I am the server".to_string(),
            buffersize: 1024,
            period_send: Duration::from_secs(5),
            period_recv: Duration::from_secs(3),
            period_sendrecv: Duration::from_secs(5),
        }
    }

    /// Client defaults.
    pub fn client() -> Self {
        Self {
            message: "Hello, World!".to_string(),
            buffersize: 1024,
            period_send: Duration::from_secs(10),
            period_recv: Duration::from_secs(2),
            period_sendrecv: Duration::from_secs(5),
        }
    }

    /// Set the loop message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set the receive buffer size.
    pub fn with_buffersize(mut self, buffersize: usize) -> Self {
        self.buffersize = buffersize;
        self
    }

    /// Use one period for every loop.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period_send = period;
        self.period_recv = period;
        self.period_sendrecv = period;
        self
    }

    /// Period of `kind`.
    pub fn period(&self, kind: LoopKind) -> Duration {
        match kind {
            LoopKind::Send => self.period_send,
            LoopKind::Recv => self.period_recv,
            LoopKind::SendRecv => self.period_sendrecv,
        }
    }
}

/// Drive one loop until it halts.
pub(crate) async fn run(session: Arc<Session>, kind: LoopKind) {
    let mut enabled = session.loop_flag(kind).subscribe();
    let mut alive = session.alive_flag().subscribe();
    let period = session.settings().period(kind);

    tracing::debug!("{} {} loop started (period {:?})", session.peer_addr(), kind, period);

    loop {
        if !*enabled.borrow() || !*alive.borrow() {
            break;
        }

        let outcome = tokio::select! {
            outcome = step(&session, kind) => outcome,
            () = halted(&mut enabled, &mut alive) => break,
        };

        if let Err(e) = outcome {
            tracing::warn!("{} {} loop error: {}", session.peer_addr(), kind, e);
            break;
        }

        tokio::select! {
            () = tokio::time::sleep(period) => {},
            () = halted(&mut enabled, &mut alive) => break,
        }
    }

    tracing::debug!("{} {} loop stopped", session.peer_addr(), kind);
}

async fn step(session: &Session, kind: LoopKind) -> Result<()> {
    match kind {
        LoopKind::Send => {
            let message = session.settings().message.clone();
            session.send(message.as_bytes()).await.map(|_| ())
        },
        LoopKind::Recv => session.recv(session.settings().buffersize).await.map(|_| ()),
        LoopKind::SendRecv => session.sendrecv().await.map(|_| ()),
    }
}

/// Resolves once the loop flag or the liveness flag drops.
async fn halted(enabled: &mut watch::Receiver<bool>, alive: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = enabled.wait_for(|on| !*on) => {},
        _ = alive.wait_for(|on| !*on) => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let server = LoopSettings::server();
        assert_eq!(server.message, "I am the server");
        assert_eq!(server.period(LoopKind::Recv), Duration::from_secs(3));

        let client = LoopSettings::client();
        assert_eq!(client.period(LoopKind::Send), Duration::from_secs(10));
        assert_eq!(client.period(LoopKind::SendRecv), Duration::from_secs(5));
    }

    #[test]
    fn test_with_period_sets_all() {
        let settings = LoopSettings::client().with_period(Duration::from_millis(20));
        for kind in LoopKind::ALL {
            assert_eq!(settings.period(kind), Duration::from_millis(20));
        }
    }
}
