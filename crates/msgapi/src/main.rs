mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "msgapi", version, about = "Device and user websocket API server")]
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

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
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
    use crate::cmd::Api;

    #[test]
    fn parses_serve_subcommand() {
        let cli = Cli::try_parse_from([
            "msgapi",
            "serve",
            "--addr",
            "127.0.0.1:0",
            "--api",
            "user",
        ])
        .expect("serve args should parse");

        match cli.command {
            Command::Serve(args) => {
                assert!(matches!(args.api, Api::User));
                assert_eq!(args.addr, "127.0.0.1:0");
            }
            other => panic!("expected serve, got {other:?}"),
        }
    }

    #[test]
    fn device_requires_a_message() {
        let err = Cli::try_parse_from(["msgapi", "device", "--key", "00"])
            .expect_err("missing --json should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn device_accepts_repeated_messages() {
        let cli = Cli::try_parse_from([
            "msgapi",
            "device",
            "--key",
            "00ff",
            "--json",
            r#"{"command":"bogus"}"#,
            "--json",
            r#"{"command":"update","args":{"values":{}}}"#,
        ])
        .expect("device args should parse");

        match cli.command {
            Command::Device(args) => assert_eq!(args.messages.len(), 2),
            other => panic!("expected device, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_api() {
        let err = Cli::try_parse_from(["msgapi", "serve", "--api", "admin"])
            .expect_err("unknown api should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }
}
