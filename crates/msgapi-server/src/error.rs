use msgapi_envelope::{EnvelopeError, ErrorValue};
use msgapi_transport::TransportError;

/// Fatal connection errors.
///
/// Recoverable protocol errors never show up here; they are answered
/// in-band as [`ErrorValue`] replies and the connection continues.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An inbound message was not a valid envelope.
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    /// The peer offered none of the supported subprotocols.
    #[error("protocol negotiation failed (offered {offered:?})")]
    NegotiationFailed { offered: Vec<String> },

    /// A push was requested before the device finished authenticating.
    #[error("device is not authenticated")]
    NotAuthenticated,

    /// The device failed the challenge-response handshake.
    #[error("authentication failed: {}", .0.message())]
    Authentication(ErrorValue),
}

impl ServerError {
    /// True when the local owner closed the connection.
    pub fn is_local_shutdown(&self) -> bool {
        matches!(self, ServerError::Transport(TransportError::Shutdown))
    }

    /// True when the peer went away or closed the connection.
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, ServerError::Transport(TransportError::Closed { .. }))
    }
}

impl From<EnvelopeError> for ServerError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::Transport(err) => ServerError::Transport(err),
            EnvelopeError::Json(err) => ServerError::Json(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
