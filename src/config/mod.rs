//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files (`<config_dir>/sipsock/config.toml` by default)
//! - Environment variables (`SIPSOCK_*`)
//! - CLI arguments, applied last by the binary
//!
//! ```toml
//! [client]
//! protocol = "udp"
//! host = "10.0.0.5"
//! port = 5060
//! timeout_secs = 5
//! tls = "all"
//!
//! [server]
//! protocol = "tcp"
//! port = 5060
//! send_loop = true
//!
//! [loops.client]
//! message = "OPTIONS sip:10.0.0.5 SIP/2.0"
//! period_sendrecv_secs = 1.5
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::ClientConfig;
use crate::error::{Result, SipError};
use crate::server::ServerConfig;
use crate::session::LoopSettings;
use crate::transport::{TlsConfig, TransportKind};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Client configuration
    #[serde(default)]
    pub client: ClientSection,

    /// Server configuration
    #[serde(default)]
    pub server: ServerSection,

    /// Loop payloads and periods
    #[serde(default)]
    pub loops: LoopsSection,
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("sipsock").join("config.toml"))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SipError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| SipError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Load `path` (or the default file if it exists), then apply the
    /// environment on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => {
                    tracing::debug!("loading config from {:?}", path);
                    Self::from_file(path)?
                },
                None => Self::default(),
            },
        };
        Ok(config.with_env())
    }

    /// Override fields from `SIPSOCK_*` environment variables.
    pub fn with_env(mut self) -> Self {
        if let Ok(protocol) = std::env::var("SIPSOCK_PROTOCOL") {
            self.client.protocol = protocol.clone();
            self.server.protocol = protocol;
        }
        if let Ok(host) = std::env::var("SIPSOCK_HOST") {
            self.client.host = host.clone();
            self.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("SIPSOCK_PORT") {
            self.client.port = port;
            self.server.port = port;
        }
        if let Some(timeout) = env_parse::<u64>("SIPSOCK_TIMEOUT") {
            self.client.timeout_secs = timeout;
        }
        if let Some(trials) = env_parse::<u32>("SIPSOCK_MAX_TRIALS") {
            self.client.max_trials = trials;
        }
        if let Some(buffersize) = env_parse::<usize>("SIPSOCK_BUFFERSIZE") {
            self.loops.client.buffersize = buffersize;
            self.loops.server.buffersize = buffersize;
        }
        if let Ok(tls) = std::env::var("SIPSOCK_TLS") {
            self.client.tls = Some(tls);
        }
        self
    }

    /// Build the client configuration
    pub fn client_config(&self) -> Result<ClientConfig> {
        let section = &self.client;
        let kind: TransportKind = section.protocol.parse()?;
        let tls = match &section.tls {
            Some(selector) => {
                let mut tls = TlsConfig::new(selector.parse()?);
                tls.ca_file = section.ca_file.clone();
                tls.server_name = section.server_name.clone();
                Some(tls)
            },
            None => None,
        };

        let config = ClientConfig {
            kind,
            host: section.host.clone(),
            port: section.port,
            timeout: Duration::from_secs(section.timeout_secs),
            tls,
            max_trials: section.max_trials,
            retry_delay: Duration::from_millis(section.retry_delay_ms),
            loops: self.loops.client.to_settings("loops.client")?,
            send_loop: section.send_loop,
            recv_loop: section.recv_loop,
            sendrecv_loop: section.sendrecv_loop,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build the server configuration
    pub fn server_config(&self) -> Result<ServerConfig> {
        let section = &self.server;
        let config = ServerConfig {
            kind: section.protocol.parse()?,
            host: section.host.clone(),
            port: section.port,
            loops: self.loops.server.to_settings("loops.server")?,
            send_loop: section.send_loop,
            recv_loop: section.recv_loop,
            idle_timeout: (section.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(section.idle_timeout_secs)),
            log_sessions: section.log_sessions,
        };
        config.validate()?;
        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("ignoring {}={:?}: not a valid value", name, raw);
            None
        },
    }
}

/// `[client]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// `udp` or `tcp`
    pub protocol: String,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Connect/send/receive timeout in seconds
    pub timeout_secs: u64,
    /// Maximum connect attempts
    pub max_trials: u32,
    /// Pause between connect attempts in milliseconds
    pub retry_delay_ms: u64,
    /// TLS version selector (`tlsv12`, `tlsv13`, `all`); plain TCP when unset
    pub tls: Option<String>,
    /// CA bundle for server verification
    pub ca_file: Option<PathBuf>,
    /// TLS server name override
    pub server_name: Option<String>,
    /// Enable the send loop
    pub send_loop: bool,
    /// Enable the receive loop
    pub recv_loop: bool,
    /// Enable the sendrecv loop
    pub sendrecv_loop: bool,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            protocol: "tcp".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5060,
            timeout_secs: 5,
            max_trials: 10,
            retry_delay_ms: 500,
            tls: None,
            ca_file: None,
            server_name: None,
            send_loop: false,
            recv_loop: false,
            sendrecv_loop: false,
        }
    }
}

/// `[server]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// `udp` or `tcp`
    pub protocol: String,
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Enable each session's send loop
    pub send_loop: bool,
    /// Enable each session's receive loop
    pub recv_loop: bool,
    /// Close sessions without a receive loop after this many idle seconds;
    /// 0 keeps them until exit or stop
    pub idle_timeout_secs: u64,
    /// Log session traffic
    pub log_sessions: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            protocol: "tcp".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5060,
            send_loop: false,
            recv_loop: true,
            idle_timeout_secs: 60,
            log_sessions: true,
        }
    }
}

/// `[loops]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopsSection {
    /// Client loops
    #[serde(default = "LoopTable::client")]
    pub client: LoopTable,
    /// Server session loops
    #[serde(default = "LoopTable::server")]
    pub server: LoopTable,
}

impl Default for LoopsSection {
    fn default() -> Self {
        Self {
            client: LoopTable::client(),
            server: LoopTable::server(),
        }
    }
}

/// `[loops.client]` / `[loops.server]` table. Periods are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopTable {
    /// Loop message
    pub message: String,
    /// Receive buffer size
    pub buffersize: usize,
    /// Send loop period
    pub period_send_secs: f64,
    /// Receive loop period
    pub period_recv_secs: f64,
    /// Sendrecv loop period
    pub period_sendrecv_secs: f64,
}

impl LoopTable {
    fn from_settings(settings: &LoopSettings) -> Self {
        Self {
            message: settings.message.clone(),
            buffersize: settings.buffersize,
            period_send_secs: settings.period_send.as_secs_f64(),
            period_recv_secs: settings.period_recv.as_secs_f64(),
            period_sendrecv_secs: settings.period_sendrecv.as_secs_f64(),
        }
    }

    /// Client defaults
    pub fn client() -> Self {
        Self::from_settings(&LoopSettings::client())
    }

    /// Server defaults
    pub fn server() -> Self {
        Self::from_settings(&LoopSettings::server())
    }

    /// Convert, rejecting negative or non-finite periods.
    pub fn to_settings(&self, path: &str) -> Result<LoopSettings> {
        let period = |name: &str, secs: f64| {
            Duration::try_from_secs_f64(secs)
                .map_err(|e| SipError::field(format!("{path}.{name}"), e.to_string()))
        };
        Ok(LoopSettings {
            message: self.message.clone(),
            buffersize: self.buffersize,
            period_send: period("period_send_secs", self.period_send_secs)?,
            period_recv: period("period_recv_secs", self.period_recv_secs)?,
            period_sendrecv: period("period_sendrecv_secs", self.period_sendrecv_secs)?,
        })
    }
}
