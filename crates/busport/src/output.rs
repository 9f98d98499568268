use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use busport_frame::{decode_buffer, is_buffer, ControlMessage};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A message received on a port, as the CLI reports it.
pub struct Received<'a> {
    pub name: &'a str,
    pub port: &'a str,
    pub server: bool,
    pub message: &'a Value,
}

impl Received<'_> {
    fn role(&self) -> &'static str {
        if self.server {
            "server"
        } else {
            "client"
        }
    }

    fn control(&self) -> Option<&'static str> {
        ControlMessage::from_value(self.message).map(|control| control.kind.as_str())
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    event: &'static str,
    name: &'a str,
    port: &'a str,
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    control: Option<&'static str>,
    payload_size: usize,
    payload: &'a Value,
    timestamp: String,
}

pub fn print_message(received: &Received<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                event: "message-received",
                name: received.name,
                port: received.port,
                role: received.role(),
                control: received.control(),
                payload_size: payload_size(received.message),
                payload: received.message,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["NAME", "PORT", "ROLE", "KIND", "PAYLOAD"])
                .add_row(vec![
                    received.name.to_string(),
                    received.port.to_string(),
                    received.role().to_string(),
                    received.control().unwrap_or("message").to_string(),
                    payload_preview(received.message),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "name={} port={} role={} kind={} payload={}",
                received.name,
                received.port,
                received.role(),
                received.control().unwrap_or("message"),
                payload_preview(received.message)
            );
        }
        OutputFormat::Raw => match raw_bytes(received.message) {
            Some(bytes) => print_raw(&bytes),
            None => print_raw(format!("{}\n", payload_preview(received.message)).as_bytes()),
        },
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn raw_bytes(message: &Value) -> Option<Vec<u8>> {
    if !is_buffer(message) {
        return None;
    }
    match decode_buffer(message) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, "received malformed buffer payload");
            None
        }
    }
}

pub fn payload_preview(message: &Value) -> String {
    if is_buffer(message) {
        return match decode_buffer(message) {
            Ok(Some(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => text.to_string(),
                Err(_) => format!("<binary {} bytes>", bytes.len()),
            },
            _ => "<malformed buffer>".to_string(),
        };
    }
    match message {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn payload_size(message: &Value) -> usize {
    serde_json::to_vec(message).map(|raw| raw.len()).unwrap_or(0)
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
