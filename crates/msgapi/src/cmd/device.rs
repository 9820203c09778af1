use msgapi_envelope::{receive_json, MessageIn, MessageOut};
use msgapi_server::{authenticate_client, ServerError, DEVICE_PROTOCOL};
use msgapi_transport::websocket::{self, UpgradeConfig};
use msgapi_transport::{CloseCode, Transport};
use tracing::{debug, info};

use crate::cmd::{parse_duration, DeviceArgs};
use crate::exit::{server_error, transport_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_reply, OutputFormat};

pub fn run(args: DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    for message in &args.messages {
        validate_envelope(message)?;
    }
    let config = UpgradeConfig {
        timeout: parse_duration(&args.timeout)?,
        ..UpgradeConfig::default()
    };

    let mut transport = websocket::connect(args.addr.as_str(), Some(DEVICE_PROTOCOL), &config)
        .map_err(|err| transport_error("connect failed", err))?;
    authenticate_client(&mut transport, &args.key)
        .map_err(|err| server_error("authentication failed", err))?;
    info!(addr = %args.addr, "authenticated");

    let mut code = SUCCESS;
    for message in &args.messages {
        transport
            .send_text(message)
            .map_err(|err| transport_error("send failed", err))?;
        let reply = wait_for_reply(&mut transport, format)?;
        if matches!(reply, MessageOut::Error { .. }) {
            code = FAILURE;
        }
        print_reply(&reply, format);
    }

    if let Err(err) = transport.close(CloseCode::GoingAway, "") {
        debug!(error = %err, "close failed");
    }
    Ok(code)
}

fn validate_envelope(raw: &str) -> CliResult<()> {
    serde_json::from_str::<MessageIn>(raw)
        .map(|_| ())
        .map_err(|err| CliError::new(USAGE, format!("--json is not a command envelope: {err}")))
}

/// Receive until a reply arrives; pushes seen on the way are printed.
fn wait_for_reply<T: Transport>(transport: &mut T, format: OutputFormat) -> CliResult<MessageOut> {
    loop {
        let message: MessageOut = receive_json(transport)
            .map_err(|err| server_error("receive failed", ServerError::from(err)))?;
        match message {
            MessageOut::Push { .. } => print_reply(&message, format),
            reply => return Ok(reply),
        }
    }
}
