use msgapi_transport::TransportError;

/// Errors that can occur while moving envelopes over a transport.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The message is not a valid envelope.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EnvelopeError>;
