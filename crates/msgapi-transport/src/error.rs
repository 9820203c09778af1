/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// An I/O error occurred on the underlying stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The websocket layer reported a protocol or framing error.
    #[error("websocket error: {0}")]
    WebSocket(tungstenite::Error),

    /// The websocket upgrade handshake did not complete.
    #[error("websocket upgrade failed: {0}")]
    Upgrade(String),

    /// The peer closed the connection (or went away without a close frame).
    #[error("connection closed by peer (code {code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },

    /// An inbound message exceeded the configured size limit.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The peer sent a binary frame; envelopes travel as UTF-8 text.
    #[error("binary frame rejected ({len} bytes)")]
    BinaryFrame { len: usize },

    /// The local side already closed this transport.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// A peer-side close without a close frame.
    pub(crate) fn peer_gone() -> Self {
        Self::Closed {
            code: None,
            reason: String::new(),
        }
    }

    /// Returns true when the error means the peer is no longer there.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Shutdown)
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::peer_gone()
            }
            tungstenite::Error::Io(io) => Self::Io(io),
            tungstenite::Error::Capacity(tungstenite::error::CapacityError::MessageTooLong {
                size,
                max_size,
            }) => Self::MessageTooLarge {
                size,
                max: max_size,
            },
            other => Self::WebSocket(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
