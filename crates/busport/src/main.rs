mod cmd;
mod exit;
mod logging;
mod output;

use busport_transport::TransportKind;
use clap::Parser;

use crate::cmd::{Command, Globals};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "busport", version, about = "Named ports over broadcast messaging")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Transport adapter: generic, window, worker or broadcast.
    #[arg(
        long,
        value_name = "KIND",
        default_value = "generic",
        env = "BUSPORT_TRANSPORT",
        global = true
    )]
    transport: TransportKind,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let globals = Globals {
        format: cli.format.unwrap_or_else(OutputFormat::default_for_stdout),
        transport: cli.transport,
    };
    let result = cmd::run(cli.command, globals);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "busport",
            "send",
            "/tmp/test.sock",
            "--name",
            "svc",
            "--data",
            "hello",
        ])
        .expect("send args should parse");

        assert!(matches!(cli.command, Command::Send(_)));
        assert_eq!(cli.transport, TransportKind::Generic);
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "busport",
            "send",
            "/tmp/test.sock",
            "--name",
            "svc",
            "--json",
            "{\"x\":1}",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_transport_kind() {
        let cli = Cli::try_parse_from([
            "busport",
            "--transport",
            "window",
            "listen",
            "/tmp/test.sock",
            "--name",
            "svc",
        ])
        .expect("transport should parse");
        assert_eq!(cli.transport, TransportKind::Window);
    }

    #[test]
    fn rejects_unknown_transport_kind() {
        let err = Cli::try_parse_from([
            "busport",
            "--transport",
            "carrier-pigeon",
            "version",
        ])
        .expect_err("unknown transport should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn parses_proxy_subcommand() {
        let cli = Cli::try_parse_from([
            "busport",
            "proxy",
            "/tmp/front.sock",
            "/tmp/back.sock",
            "--name",
            "svc",
            "--max-backlog",
            "16",
        ])
        .expect("proxy args should parse");
        assert!(matches!(cli.command, Command::Proxy(_)));
    }
}
