use std::fmt;

use bytes::Bytes;

use crate::error::Result;

/// Longest close reason a websocket control frame can carry (125 - 2 code bytes).
pub const MAX_CLOSE_REASON_LEN: usize = 123;

/// Close codes used by the protocol, numbered as in RFC 6455.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// The connection owner is shutting the connection down (1001).
    GoingAway,
    /// Negotiation, authentication, framing or transport failure (1002).
    ProtocolError,
}

impl CloseCode {
    /// Numeric wire value.
    pub fn as_u16(self) -> u16 {
        match self {
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
        }
    }

    /// Map a numeric wire value back to a known close code.
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1001 => Some(CloseCode::GoingAway),
            1002 => Some(CloseCode::ProtocolError),
            _ => None,
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseCode::GoingAway => write!(f, "going-away ({})", self.as_u16()),
            CloseCode::ProtocolError => write!(f, "protocol-error ({})", self.as_u16()),
        }
    }
}

/// Truncate a close reason to [`MAX_CLOSE_REASON_LEN`] bytes on a char boundary.
pub fn close_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON_LEN {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON_LEN;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

/// Outbound half of a transport.
///
/// Senders are cheap to clone and may be used from any thread, so the
/// owner of a connection can push messages while another thread is
/// blocked in [`Transport::receive`].
pub trait MessageSender: Clone + Send + 'static {
    /// Send one text message.
    fn send_text(&self, text: &str) -> Result<()>;

    /// Send a close frame with `code` and `reason`.
    ///
    /// Closing twice is a no-op. Any later send fails with
    /// [`TransportError::Shutdown`](crate::TransportError::Shutdown).
    fn close(&self, code: CloseCode, reason: &str) -> Result<()>;
}

/// A connected, message-framed, full-duplex transport.
pub trait Transport: Send {
    /// Outbound handle type.
    type Sender: MessageSender;

    /// Block until the next complete inbound message arrives.
    ///
    /// Control traffic (ping/pong) is handled internally and never surfaces.
    fn receive(&mut self) -> Result<Bytes>;

    /// A new handle to the outbound half.
    fn sender(&self) -> Self::Sender;

    /// Cap the size of subsequent inbound messages.
    fn set_max_message_size(&mut self, max: usize) -> Result<()>;

    /// Send one text message.
    fn send_text(&self, text: &str) -> Result<()> {
        self.sender().send_text(text)
    }

    /// Send a close frame.
    fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        self.sender().close(code, reason)
    }
}
