//! sipsock CLI binary.
//!
//! UDP/TCP client/server toolkit with a SIP-like message codec.
//!
//! # Commands
//!
//! - `client` - Connect to a server and run the client loops
//! - `server` - Listen and run a session per peer
//! - `scenario` - Parse a scenario file and print its description
//! - `realize` - Execute a scenario file and report the outcome
//! - `decode` - Decode wire text and describe the message

use std::io::{self, Read};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sipsock::{
    session::LoopKind, Client, Config, Realizer, Scenario, Server, SipMessage, VERSION,
};

#[derive(Parser)]
#[command(name = "sipsock")]
#[command(version = VERSION)]
#[command(about = "sipsock - UDP/TCP client/server with a SIP-like codec", long_about = None)]
struct Cli {
    /// Config file (default: <config_dir>/sipsock/config.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a server and run the enabled loops
    Client {
        /// Transport (udp, tcp)
        protocol: Option<String>,

        /// Server host
        host: Option<String>,

        /// Server port
        port: Option<u16>,

        /// Timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Receive buffer size
        #[arg(short, long)]
        buffersize: Option<usize>,

        /// Maximum connect attempts
        #[arg(long)]
        trials: Option<u32>,

        /// Wrap TCP in TLS (tlsv12, tlsv13, all)
        #[arg(long)]
        tls: Option<String>,

        /// CA bundle used to verify the server certificate
        #[arg(long)]
        ca_file: Option<PathBuf>,

        /// Loop message
        #[arg(short, long)]
        message: Option<String>,

        /// Enable the send loop
        #[arg(long)]
        send_loop: bool,

        /// Enable the receive loop
        #[arg(long)]
        recv_loop: bool,

        /// Enable the sendrecv loop
        #[arg(long)]
        sendrecv_loop: bool,
    },

    /// Listen and serve every peer
    Server {
        /// Transport (udp, tcp)
        protocol: Option<String>,

        /// Listen port
        port: Option<u16>,

        /// Listen host
        #[arg(long)]
        host: Option<String>,

        /// Bind to all interfaces
        #[arg(long)]
        bind_all: bool,

        /// Receive buffer size
        #[arg(short, long)]
        buffersize: Option<usize>,

        /// Session loop message
        #[arg(short, long)]
        message: Option<String>,

        /// Enable each session's send loop
        #[arg(long)]
        send_loop: bool,

        /// Disable each session's receive loop
        #[arg(long)]
        no_recv_loop: bool,

        /// Do not log session traffic
        #[arg(long)]
        quiet: bool,
    },

    /// Parse a scenario and print its description
    Scenario {
        /// Scenario file (JSON, or TOML with a .toml extension)
        file: PathBuf,
    },

    /// Execute a scenario
    Realize {
        /// Scenario file (JSON, or TOML with a .toml extension)
        file: PathBuf,

        /// Host a server agent binds to
        #[arg(long)]
        bind_host: Option<String>,

        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode wire text and describe the message
    Decode {
        /// Wire text (or - for stdin)
        input: Option<String>,

        /// Input file path
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Client {
            protocol,
            host,
            port,
            timeout,
            buffersize,
            trials,
            tls,
            ca_file,
            message,
            send_loop,
            recv_loop,
            sendrecv_loop,
        } => {
            let mut config = Config::load(cli.config.as_deref())?;
            let section = &mut config.client;
            if let Some(protocol) = protocol {
                section.protocol = protocol;
            }
            if let Some(host) = host {
                section.host = host;
            }
            if let Some(port) = port {
                section.port = port;
            }
            if let Some(timeout) = timeout {
                section.timeout_secs = timeout;
            }
            if let Some(trials) = trials {
                section.max_trials = trials;
            }
            if tls.is_some() {
                section.tls = tls;
            }
            if ca_file.is_some() {
                section.ca_file = ca_file;
            }
            section.send_loop |= send_loop;
            section.recv_loop |= recv_loop;
            section.sendrecv_loop |= sendrecv_loop;
            if let Some(buffersize) = buffersize {
                config.loops.client.buffersize = buffersize;
            }
            if let Some(message) = message {
                config.loops.client.message = message;
            }
            cmd_client(&config)
        },

        Commands::Server {
            protocol,
            port,
            host,
            bind_all,
            buffersize,
            message,
            send_loop,
            no_recv_loop,
            quiet,
        } => {
            let mut config = Config::load(cli.config.as_deref())?;
            let section = &mut config.server;
            if let Some(protocol) = protocol {
                section.protocol = protocol;
            }
            if let Some(port) = port {
                section.port = port;
            }
            if let Some(host) = host {
                section.host = host;
            }
            section.send_loop |= send_loop;
            if no_recv_loop {
                section.recv_loop = false;
            }
            if quiet {
                section.log_sessions = false;
            }
            if let Some(buffersize) = buffersize {
                config.loops.server.buffersize = buffersize;
            }
            if let Some(message) = message {
                config.loops.server.message = message;
            }
            cmd_server(&config, bind_all)
        },

        Commands::Scenario { file } => cmd_scenario(file),

        Commands::Realize {
            file,
            bind_host,
            json,
        } => cmd_realize(file, bind_host, json),

        Commands::Decode { input, file, json } => cmd_decode(input, file, json),
    }
}

fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();
}

fn cmd_client(config: &Config) -> anyhow::Result<()> {
    let client_config = config.client_config()?;
    if let Some(tls) = &client_config.tls {
        tracing::info!("TLS: {:?}", tls.selector);
    }
    let once = !LoopKind::ALL
        .iter()
        .any(|kind| client_config.loop_enabled(*kind));

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let mut client = Client::new(client_config)?;

        if once {
            // No loop requested: one round trip with the loop message.
            client.connect().await?;
            let reply = client.sendrecv().await;
            client.disconnect().await?;
            println!("{}", String::from_utf8_lossy(&reply?));
            return Ok(());
        }

        tokio::select! {
            result = client.run() => result?,
            _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
        }
        client.disconnect().await?;
        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_server(config: &Config, bind_all: bool) -> anyhow::Result<()> {
    let mut server_config = config.server_config()?;
    if bind_all {
        server_config = server_config.bind_all();
    }

    tracing::info!(
        "Starting sipsock {} server on {}",
        server_config.kind,
        server_config.listen_addr()
    );
    for kind in LoopKind::ALL {
        if server_config.loop_enabled(kind) {
            tracing::info!("Session {} loop: enabled", kind);
        }
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let server = Server::new(server_config)?;
        server
            .run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!("unable to listen for ctrl-c: {}", e);
                    std::future::pending::<()>().await;
                }
            })
            .await?;
        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_scenario(file: PathBuf) -> anyhow::Result<()> {
    let scenario = Scenario::from_file(&file)?;
    print!("{}", scenario.describe());
    Ok(())
}

fn cmd_realize(file: PathBuf, bind_host: Option<String>, json_output: bool) -> anyhow::Result<()> {
    let mut realizer = Realizer::from_file(&file)?;
    if let Some(host) = bind_host {
        realizer = realizer.with_bind_host(host);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(realizer.realize())?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }

    if !report.passed() {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_decode(input: Option<String>, file: Option<PathBuf>, json_output: bool) -> anyhow::Result<()> {
    let content = read_input(input, file)?;

    let Some(message) = SipMessage::decode(&content) else {
        eprintln!("invalid sip content");
        std::process::exit(1);
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&message)?);
    } else {
        print!("{}", message.describe());
    }

    Ok(())
}

// Helper functions

fn read_input(input: Option<String>, file: Option<PathBuf>) -> anyhow::Result<String> {
    if let Some(path) = file {
        Ok(std::fs::read_to_string(path)?)
    } else if let Some(s) = input {
        if s == "-" {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        } else {
            // Allow escaped line breaks on the command line.
            Ok(s.replace("\\r\\n", "\r\n").replace("\\n", "\n"))
        }
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    }
}
