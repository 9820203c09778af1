use std::io::IsTerminal;
use std::net::SocketAddr;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use msgapi_envelope::MessageOut;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
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

/// Announce the bound address so callers can connect to port 0 listeners.
pub fn print_listening(addr: SocketAddr, api: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({
                "event": "listening",
                "addr": addr.to_string(),
                "api": api,
            });
            println!("{out}");
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("listening on {addr} (api={api})");
        }
    }
}

/// Print one message received from the server.
pub fn print_reply(reply: &MessageOut, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(reply).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let (kind, detail) = describe(reply);
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["REPLY", "DETAIL"])
                .add_row(vec![kind.to_string(), detail]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let (kind, detail) = describe(reply);
            println!("{kind} {detail}");
        }
    }
}

fn describe(reply: &MessageOut) -> (&'static str, String) {
    match reply {
        MessageOut::Ack { now } => ("ack", format!("now={now}")),
        MessageOut::Error { error } => (
            "error",
            format!("kind={} message={}", error.kind(), error.message()),
        ),
        MessageOut::Push { command, args } => ("push", format!("command={command} args={args}")),
    }
}
