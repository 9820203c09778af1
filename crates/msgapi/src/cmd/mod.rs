use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use msgapi_server::{AuthenticationKey, DEFAULT_MAX_MESSAGE_SIZE};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod device;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept Device or User API connections.
    Serve(ServeArgs),
    /// Connect as a device, authenticate and send command envelopes.
    Device(DeviceArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Device(args) => device::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Which API a listener serves.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Api {
    Device,
    User,
}

impl Api {
    pub fn name(self) -> &'static str {
        match self {
            Api::Device => "device",
            Api::User => "user",
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "MSGAPI_ADDR", default_value = "127.0.0.1:8080")]
    pub addr: String,
    /// API served on this listener.
    #[arg(long, value_enum, default_value = "device")]
    pub api: Api,
    /// Pre-shared device key as hex. Required for the device API.
    #[arg(
        long,
        env = "MSGAPI_DEVICE_KEY",
        hide_env_values = true,
        value_name = "HEX",
        value_parser = parse_key
    )]
    pub key: Option<AuthenticationKey>,
    /// Maximum inbound message size in bytes.
    #[arg(long, env = "MSGAPI_MAX_MESSAGE_SIZE", default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,
    /// Stop accepting after N connections and exit once they finish.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct DeviceArgs {
    /// Server address.
    #[arg(long, env = "MSGAPI_ADDR", default_value = "127.0.0.1:8080")]
    pub addr: String,
    /// Pre-shared device key as hex.
    #[arg(
        long,
        env = "MSGAPI_DEVICE_KEY",
        hide_env_values = true,
        value_name = "HEX",
        value_parser = parse_key
    )]
    pub key: AuthenticationKey,
    /// Command envelope to send; repeat to send several in order.
    #[arg(long = "json", value_name = "ENVELOPE", required = true)]
    pub messages: Vec<String>,
    /// Upgrade handshake timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn parse_key(text: &str) -> Result<AuthenticationKey, String> {
    let key = AuthenticationKey::from_hex(text).map_err(|err| format!("not a hex key: {err}"))?;
    if key.as_bytes().is_empty() {
        return Err("key must not be empty".to_string());
    }
    Ok(key)
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn parse_key_accepts_hex_only() {
        assert_eq!(parse_key("00ff").unwrap().as_bytes(), &[0x00, 0xff]);
        assert!(parse_key("xyz").is_err());
        assert!(parse_key("").is_err());
    }

    #[test]
    fn parsed_key_debug_hides_bytes() {
        let args = format!("{:?}", parse_key("cafebabe").unwrap());
        assert!(!args.contains("cafebabe"));
    }
}
