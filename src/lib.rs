//! # sipsock - UDP/TCP Client/Server Framework
//!
//! Small networking toolkit for exercising SIP-like peers: clients and
//! servers over UDP or TCP (optionally TLS), a text message codec, and a
//! scenario runner that replays scripted exchanges and checks the replies.
//!
//! ## Architecture
//!
//! ```text
//!   Client ──connect──> Link ──────────────┐
//!                                          v
//!                                       Session ── send/recv/sendrecv loops
//!                                          ^
//!   Server ──accept───> Link (per peer) ───┘
//!
//!   Scenario (JSON/TOML) ──> Realizer ──> RealizationReport
//! ```
//!
//! Every server, client and session is a subject of a [`notifier::Notifier`];
//! observers receive lifecycle and I/O events.
//!
//! ### Session State Machine
//!
//! ```text
//!     [Created] ──activate()──> [Active]
//!                                  │
//!                  "exit" / error  │ close()
//!                                  v
//!                              [Closing] ──────> [Closed]
//! ```
//!
//! ### Wire Format
//!
//! ```text
//! INVITE sip:bob@127.0.0.1 SIP/2.0\r\n
//! CSeq: 1\r\n
//! \r\n
//! v=0\r\n
//! ```
//!
//! ## Quick Start
//!
//! ### Client
//!
//! ```rust,ignore
//! use sipsock::{Client, ClientConfig, TransportKind};
//!
//! let mut client = Client::new(ClientConfig::new(TransportKind::Tcp, "127.0.0.1", 5060))?;
//! client.connect().await?;
//! client.send(b"hello").await?;
//! let reply = client.recv(1024).await?;
//! client.disconnect().await?;
//! ```
//!
//! ### Server
//!
//! ```rust,ignore
//! use sipsock::{Server, ServerConfig, TransportKind};
//!
//! let server = Server::new(ServerConfig::new(TransportKind::Udp, "0.0.0.0", 5060))?;
//! server.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! ```
//!
//! ### Scenario
//!
//! ```rust,ignore
//! use sipsock::Realizer;
//!
//! let report = Realizer::from_file("invite.json")?.realize().await?;
//! println!("{report}");
//! ```
//!
//! ## Modules
//!
//! - [`transport`]: UDP, TCP and TLS links
//! - [`session`]: Per-peer state, I/O and background loops
//! - [`client`]: Outbound connections with retry
//! - [`server`]: Listener, accept loop and session table
//! - [`notifier`]: Observer/event plumbing
//! - [`sip`]: Message model and codec
//! - [`scenario`]: Scenario documents
//! - [`realizer`]: Scenario execution and matching
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod client;
pub mod config;
pub mod error;
pub mod notifier;
pub mod realizer;
pub mod scenario;
pub mod server;
pub mod session;
pub mod sip;
pub mod transport;

// Re-exports for convenience
pub use client::{Client, ClientConfig};
pub use config::Config;
pub use error::{Result, SipError};
pub use notifier::{Event, EventKind, Notifier, Observer, Subject};
pub use realizer::{RealizationReport, Realizer};
pub use scenario::{Action, Scenario};
pub use server::{Server, ServerConfig};
pub use session::{LoopKind, LoopSettings, Session, SessionState};
pub use sip::{MessageKind, SipMessage, StartLine};
pub use transport::{Link, TlsConfig, TransportKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
