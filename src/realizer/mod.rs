//! Scenario execution.
//!
//! The realizer instantiates the client or server a scenario's agent asks
//! for, with every loop disabled, and runs the actions strictly in order:
//!
//! - `send`: build the template, encode it and transmit it.
//! - `recv`: receive up to `buffersize` bytes, decode them and compare the
//!   result against the template (see [`matcher`]).
//!
//! A client agent connects first. A server agent starts listening, accepts
//! its first peer and runs the actions against that peer's session, then
//! stops.
//!
//! Transport errors abort the run. Mismatches and undecodable payloads are
//! recorded in the [`RealizationReport`] and execution continues.

pub mod matcher;
mod report;

pub use report::{ActionOutcome, RealizationReport};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::client::{Client, ClientConfig};
use crate::error::{Result, SipError};
use crate::notifier::Observer;
use crate::scenario::{Action, AgentRole, Scenario};
use crate::server::{Server, ServerConfig};
use crate::session::{LoopSettings, Session};
use crate::sip::SipMessage;

/// Host a server agent binds to by default.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Runs one scenario.
#[derive(Debug)]
pub struct Realizer {
    scenario: Scenario,
    bind_host: String,
    observers: Vec<Arc<Observer>>,
}

impl Realizer {
    /// Create a realizer for an already-parsed scenario.
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            bind_host: DEFAULT_BIND_HOST.to_string(),
            observers: Vec::new(),
        }
    }

    /// Parse a scenario file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Scenario::from_file(path)?))
    }

    /// Host a server agent binds to.
    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    /// Register `observer` on the client or server the run creates.
    pub fn with_observer(mut self, observer: Arc<Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Get the scenario
    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Execute the scenario.
    pub async fn realize(&self) -> Result<RealizationReport> {
        let agent = &self.scenario.agent;
        tracing::info!(
            "realizing {} scenario over {} ({} action(s))",
            agent.role.name(),
            agent.protocol,
            self.scenario.messages.len()
        );

        match &agent.role {
            AgentRole::Client { ip, timeout } => self.realize_client(ip, *timeout).await,
            AgentRole::Server => self.realize_server().await,
        }
    }

    async fn realize_client(&self, ip: &str, timeout: u64) -> Result<RealizationReport> {
        let agent = &self.scenario.agent;
        let config = ClientConfig::new(agent.protocol, ip, agent.port)
            .with_timeout(Duration::from_secs(timeout))
            .with_loops(LoopSettings::client().with_buffersize(agent.buffersize));

        let mut client = Client::new(config)?;
        for observer in &self.observers {
            client.register(observer);
        }

        let session = client.connect().await?;
        let result = self.run_actions(&session).await;
        client.disconnect().await?;
        result
    }

    async fn realize_server(&self) -> Result<RealizationReport> {
        let agent = &self.scenario.agent;
        let config = ServerConfig {
            kind: agent.protocol,
            host: self.bind_host.clone(),
            port: agent.port,
            loops: LoopSettings::server().with_buffersize(agent.buffersize),
            send_loop: false,
            recv_loop: false,
            idle_timeout: None,
            log_sessions: true,
        };

        let server = Server::new(config)?;
        for observer in &self.observers {
            server.register(observer);
        }

        server.start().await?;
        let result = async {
            let accepted = server.accept().await?;
            // UDP peers only receive through the accept loop, so keep it
            // running while the actions execute.
            tokio::select! {
                report = self.run_actions(&accepted.session) => report,
                served = server.serve() => Err(served.err().unwrap_or_else(|| {
                    SipError::Config("accept loop ended".to_string())
                })),
            }
        }
        .await;

        server.stop().await?;
        result
    }

    async fn run_actions(&self, session: &Session) -> Result<RealizationReport> {
        let buffersize = self.scenario.agent.buffersize;
        let mut report = RealizationReport::default();

        for (index, step) in self.scenario.messages.iter().enumerate() {
            let expected = step.template.build();
            let mut outcome = ActionOutcome {
                index,
                action: step.action,
                kind: step.template.kind(),
                mismatches: Vec::new(),
                received: None,
            };

            match step.action {
                Action::Send => {
                    let wire = expected.encode();
                    tracing::debug!("#{} sending {} bytes", index, wire.len());
                    session.send(wire.as_bytes()).await?;
                },
                Action::Recv => {
                    let payload = session.recv(buffersize).await?;
                    match SipMessage::decode_bytes(&payload) {
                        Ok(actual) => {
                            outcome.mismatches = matcher::compare(&step.template, &actual);
                            outcome.received = Some(actual);
                        },
                        Err(e) => outcome.mismatches.push(e.to_string()),
                    }
                },
            }

            report.push(outcome);
        }

        Ok(report)
    }
}
