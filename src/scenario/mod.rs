//! Declarative scenarios.
//!
//! A scenario names one agent (client or server, with its transport
//! parameters) and an ordered list of send/receive actions, each carrying a
//! message template.
//!
//! # Document Schema
//!
//! ```json
//! {
//!   "agent": { "type": "client", "protocol": "tcp", "ip": "127.0.0.1",
//!              "port": 5060, "timeout": 5, "buffersize": 1024 },
//!   "messages": [
//!     { "type": "request", "action": "send", "version": "SIP/2.0",
//!       "method": "INVITE", "uri": "sip:bob@127.0.0.1",
//!       "headers": [ { "name": "CSeq", "value": "1" } ], "content": "v=0" },
//!     { "type": "response", "action": "recv", "version": "SIP/2.0",
//!       "code": 200, "reason": "OK" }
//!   ]
//! }
//! ```
//!
//! The same schema may be written as TOML (files ending in `.toml`).
//!
//! Parsing is strict and fails on the first problem with an error naming the
//! field by its dotted path. A parsed scenario is immutable.

mod fields;
mod template;

pub use template::{Action, MessageAction, MessageTemplate};

use std::fmt::Write as _;
use std::path::Path;

use serde_json::Value;

use self::fields::Fields;
use self::template::describe_field;
use crate::error::{Result, SipError};
use crate::transport::TransportKind;

/// Buffer size used when the agent does not set one.
pub const DEFAULT_BUFFERSIZE: usize = 1024;

/// Role-specific agent fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentRole {
    /// Connects to `ip:port`
    Client {
        /// Server address
        ip: String,
        /// Timeout in seconds
        timeout: u64,
    },
    /// Listens on `port`
    Server,
}

impl AgentRole {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Client { .. } => "client",
            Self::Server => "server",
        }
    }
}

/// The agent a scenario drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    /// Transport
    pub protocol: TransportKind,
    /// Server port (client) or listen port (server)
    pub port: u16,
    /// Receive buffer size
    pub buffersize: usize,
    /// Role
    pub role: AgentRole,
}

impl Agent {
    fn parse(value: &Value) -> Result<Self> {
        let fields = Fields::object(value, "agent")?;

        let role_name = fields.str("type")?;
        let protocol: TransportKind = fields.str("protocol")?.parse()?;
        let port = fields.int("port")?;
        let buffersize = fields.opt_int("buffersize")?.unwrap_or(DEFAULT_BUFFERSIZE);
        if buffersize == 0 {
            return Err(SipError::field(fields.path("buffersize"), "must be greater than zero"));
        }

        let role = match role_name {
            "client" => {
                let ip = fields.token("ip")?.to_string();
                let timeout = fields.int("timeout")?;
                if timeout == 0 {
                    return Err(SipError::field(fields.path("timeout"), "must be greater than zero"));
                }
                AgentRole::Client { ip, timeout }
            },
            "server" => AgentRole::Server,
            other => {
                return Err(SipError::ProtocolMismatch(format!(
                    "unknown agent type: {other}"
                )))
            },
        };

        Ok(Self {
            protocol,
            port,
            buffersize,
            role,
        })
    }

    fn describe_into(&self, out: &mut String) {
        let _ = writeln!(out, "### {} AGENT ###", self.role.name());
        describe_field(out, "protocol", self.protocol.name());
        if let AgentRole::Client { ip, timeout } = &self.role {
            describe_field(out, "ip", ip);
            describe_field(out, "port", &self.port.to_string());
            describe_field(out, "buffersize", &self.buffersize.to_string());
            describe_field(out, "timeout", &timeout.to_string());
        } else {
            describe_field(out, "port", &self.port.to_string());
            describe_field(out, "buffersize", &self.buffersize.to_string());
        }
        out.push_str("###\n");
    }
}

/// A parsed scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    /// Agent
    pub agent: Agent,
    /// Actions in execution order
    pub messages: Vec<MessageAction>,
}

impl Scenario {
    /// Load a scenario file. `.toml` files are read as TOML, everything
    /// else as JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SipError::Config(format!(
                "scenario path is not a file: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            SipError::Config(format!("unable to read {}: {}", path.display(), e))
        })?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            Self::from_toml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
    }

    /// Parse a JSON document.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| SipError::Config(format!("invalid json content: {e}")))?;
        Self::from_value(&value)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: toml::Value = toml::from_str(content)?;
        Self::from_value(&serde_json::to_value(table)?)
    }

    /// Validate an already-parsed document.
    pub fn from_value(value: &Value) -> Result<Self> {
        let root = Fields::object(value, "")?;
        let agent = Agent::parse(root.require("agent")?)?;

        let messages = root
            .array("messages")?
            .iter()
            .enumerate()
            .map(|(index, message)| MessageAction::parse(message, index))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            "parsed {} scenario with {} action(s)",
            agent.role.name(),
            messages.len()
        );
        Ok(Self { agent, messages })
    }

    /// Render the agent and every message.
    pub fn describe(&self) -> String {
        let mut out = String::from("*** SCENARIO ***\n");
        self.agent.describe_into(&mut out);
        for message in &self.messages {
            message.describe_into(&mut out);
        }
        out.push_str("*** END ***\n");
        out
    }
}
