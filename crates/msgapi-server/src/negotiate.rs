use msgapi_transport::{CloseCode, Transport};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{Result, ServerError};

/// Subprotocol of the Device API.
pub const DEVICE_PROTOCOL: &str = "v2.device.msg";
/// Subprotocol of the User API.
pub const USER_PROTOCOL: &str = "v5.user.msg";

/// Inbound message cap applied once a connection is negotiated.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4096;

/// Configuration for subprotocol negotiation.
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    /// Maximum inbound message size in bytes after negotiation.
    pub max_message_size: usize,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Pick the subprotocol to use.
///
/// Supported protocols are tried in the server's order of preference and
/// must match an offered value exactly.
pub fn select_protocol<'a>(offered: &[String], supported: &[&'a str]) -> Option<&'a str> {
    supported
        .iter()
        .copied()
        .find(|protocol| offered.iter().any(|candidate| candidate == protocol))
}

/// Bind a transport to a negotiated subprotocol.
///
/// When nothing matches, the transport is closed with a protocol-error code
/// and no other message is sent.
pub fn negotiate<T: Transport>(
    mut transport: T,
    offered: &[String],
    supported: &[&str],
    config: &NegotiationConfig,
) -> Result<Connection<T>> {
    let Some(protocol) = select_protocol(offered, supported) else {
        warn!(?offered, ?supported, "protocol negotiation failed");
        let _ = transport.close(CloseCode::ProtocolError, "protocol negotiation failed");
        return Err(ServerError::NegotiationFailed {
            offered: offered.to_vec(),
        });
    };

    transport.set_max_message_size(config.max_message_size)?;
    debug!(
        protocol,
        max_message_size = config.max_message_size,
        "protocol negotiated"
    );

    Ok(Connection::new(transport, protocol.to_string()))
}
