//! sipsock error types.
//!
//! # Error Classification
//!
//! | Class              | Variants                          | Policy                              |
//! |--------------------|-----------------------------------|-------------------------------------|
//! | Config             | `Config`, `InvalidField`          | Fatal before any I/O                |
//! | Protocol mismatch  | `ProtocolMismatch`                | Fatal at setup                      |
//! | Connect            | `Connect`, `Tls`                  | Retried, then fatal                 |
//! | I/O                | `Io`, `PeerClosed`                | Ends the affected loop or session   |
//! | Decode             | `Decode`                          | Returned to the caller, never panic |
//!
//! Per-connection errors stay local to the session or client that hit them;
//! sibling sessions on the same server keep running.

use thiserror::Error;

use crate::session::SessionState;

/// sipsock errors.
#[derive(Error, Debug)]
pub enum SipError {
    /// Malformed configuration (CLI, config file or scenario document).
    #[error("Config error: {0}")]
    Config(String),

    /// A scenario or config field is missing or has the wrong type.
    #[error("Config error: field `{field}` {reason}")]
    InvalidField {
        /// Dotted path of the offending field (e.g. `agent.port`).
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Unknown protocol, agent type, message type or action string.
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// Connecting failed after exhausting the trial budget.
    #[error("Connect error after {attempts} attempt(s): {reason}")]
    Connect {
        /// Number of attempts made.
        attempts: u32,
        /// Last failure reported by the transport.
        reason: String,
    },

    /// Encryption wrapper setup or handshake failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The peer closed the connection (zero-length read).
    #[error("Peer closed the connection")]
    PeerClosed,

    /// Operation attempted on a session that is not active.
    #[error("Session not active (state: {0:?})")]
    SessionInactive(SessionState),

    /// Payload could not be decoded as a message.
    #[error("Decode error: {0}")]
    Decode(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (including timeouts).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for sipsock operations
pub type Result<T> = std::result::Result<T, SipError>;

impl SipError {
    /// Build an [`SipError::InvalidField`].
    pub fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        SipError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is fatal at setup time (aborts before any I/O).
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            SipError::Config(_)
                | SipError::InvalidField { .. }
                | SipError::ProtocolMismatch(_)
                | SipError::Json(_)
        )
    }
}

impl From<toml::de::Error> for SipError {
    fn from(err: toml::de::Error) -> Self {
        SipError::Config(err.to_string())
    }
}

impl From<rustls::Error> for SipError {
    fn from(err: rustls::Error) -> Self {
        SipError::Tls(err.to_string())
    }
}
