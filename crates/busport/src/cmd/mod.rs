use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use busport_channel::{ChannelConfig, ConnectMode, GenericChannel};
use busport_transport::{DispatchHandle, StreamLink, TransportKind};
use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod echo;
pub mod listen;
pub mod proxy;
pub mod send;
pub mod serve;
pub mod version;

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Copy)]
pub struct Globals {
    pub format: OutputFormat,
    pub transport: TransportKind,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve a port name and echo every message back.
    Echo(EchoArgs),
    /// Connect to a port name and send one message.
    Send(SendArgs),
    /// Serve a port name and print received messages.
    Listen(ListenArgs),
    /// Relay ports for a name from one socket to another.
    Proxy(ProxyArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, globals: Globals) -> CliResult<i32> {
    match command {
        Command::Echo(args) => echo::run(args, globals),
        Command::Send(args) => send::run(args, globals),
        Command::Listen(args) => listen::run(args, globals),
        Command::Proxy(args) => proxy::run(args, globals),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Port name to serve.
    #[arg(long, short = 'n')]
    pub name: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Port name to connect to.
    #[arg(long, short = 'n')]
    pub name: String,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file (sent as a base64 buffer).
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Wait for one response message and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for a response when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
    /// Maximum time to wait for the listener to accept the port.
    #[arg(long, default_value = "5s", conflicts_with = "optimistic")]
    pub connect_timeout: String,
    /// Treat the port as open as soon as the connect is sent.
    #[arg(long)]
    pub optimistic: bool,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Port name to serve.
    #[arg(long, short = 'n')]
    pub name: String,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ProxyArgs {
    /// Socket path to bind for incoming links.
    pub listen_path: PathBuf,
    /// Socket path of the upstream server.
    pub target_path: PathBuf,
    /// Port names to relay (comma-separated).
    #[arg(long, short = 'n', value_delimiter = ',', required = true)]
    pub name: Vec<String>,
    /// Messages held per port while its upstream leg is opening.
    #[arg(long, default_value = "1024")]
    pub max_backlog: usize,
    /// Maximum time to wait for the upstream server to accept a port.
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// A channel carried over one stream link.
pub fn link_channel(
    link: &StreamLink,
    kind: TransportKind,
    dispatch: DispatchHandle,
    config: ChannelConfig,
) -> GenericChannel {
    GenericChannel::with_config(kind.build(Arc::new(link.clone())), dispatch, config)
}

pub fn confirmed(timeout: &str) -> CliResult<ChannelConfig> {
    Ok(ChannelConfig {
        connect_mode: ConnectMode::Confirmed {
            timeout: parse_duration(timeout)?,
        },
    })
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}
