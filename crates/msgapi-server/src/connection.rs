use bytes::Bytes;
use msgapi_envelope::{receive_json, send_json, MessageIn, MessageOut};
use msgapi_transport::{CloseCode, MessageSender, Transport};
use serde::Serialize;
use tracing::debug;

use crate::error::Result;

/// A negotiated connection: one transport bound to one subprotocol.
#[derive(Debug)]
pub struct Connection<T> {
    transport: T,
    protocol: String,
}

impl<T: Transport> Connection<T> {
    pub(crate) fn new(transport: T, protocol: String) -> Self {
        Self {
            transport,
            protocol,
        }
    }

    /// Negotiated subprotocol.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Receive and decode one inbound envelope.
    pub fn receive(&mut self) -> Result<MessageIn> {
        Ok(receive_json(&mut self.transport)?)
    }

    /// Receive one message without interpreting it.
    pub fn receive_raw(&mut self) -> Result<Bytes> {
        Ok(self.transport.receive()?)
    }

    /// Send an outbound envelope.
    pub fn send(&self, message: &MessageOut) -> Result<()> {
        send_json(&self.transport.sender(), message)?;
        Ok(())
    }

    /// Send a plain text message.
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.transport.send_text(text)?;
        Ok(())
    }

    /// A cloneable handle for server-initiated pushes.
    pub fn pusher(&self) -> Pusher<T::Sender> {
        Pusher {
            sender: self.transport.sender(),
        }
    }

    /// Close gracefully with a going-away code.
    pub fn close(&self) -> Result<()> {
        self.transport.close(CloseCode::GoingAway, "")?;
        Ok(())
    }

    /// Single exit point of a connection's lifetime.
    ///
    /// A shutdown requested by the owner ends the connection cleanly. Every
    /// other error closes the transport with a protocol-error code carrying
    /// the error text, then propagates.
    pub(crate) fn finish(&self, result: Result<()>) -> Result<()> {
        match result {
            Err(err) if err.is_local_shutdown() => {
                debug!(protocol = %self.protocol, "connection closed by owner");
                Ok(())
            }
            Err(err) => {
                debug!(protocol = %self.protocol, error = %err, "connection terminated");
                let _ = self
                    .transport
                    .close(CloseCode::ProtocolError, &err.to_string());
                Err(err)
            }
            Ok(()) => Ok(()),
        }
    }
}

/// Fire-and-forget sender of server-initiated commands.
#[derive(Debug, Clone)]
pub struct Pusher<S> {
    sender: S,
}

impl<S: MessageSender> Pusher<S> {
    /// Send `{"command": command, "args": args}` to the peer.
    pub fn push<A: Serialize>(&self, command: &str, args: &A) -> Result<()> {
        let message = MessageOut::push(command, args)?;
        send_json(&self.sender, &message)?;
        Ok(())
    }

    /// Close the connection with a going-away code.
    ///
    /// A dispatch loop blocked on this connection returns `Ok(())`.
    pub fn close(&self) -> Result<()> {
        self.sender.close(CloseCode::GoingAway, "")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use msgapi_transport::memory::pair;
    use msgapi_transport::TransportError;

    use super::*;
    use crate::error::ServerError;

    #[test]
    fn pusher_sends_command_envelope() {
        let (server, mut client) = pair();
        let conn = Connection::new(server, "v2.device.msg".to_string());

        conn.pusher()
            .push("requestRealtimeUpdates", &vec!["s1".to_string()])
            .unwrap();

        let raw = client.receive().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "command": "requestRealtimeUpdates", "args": ["s1"] })
        );
    }

    #[test]
    fn pusher_close_uses_going_away() {
        let (server, mut client) = pair();
        let conn = Connection::new(server, "v5.user.msg".to_string());
        conn.pusher().close().unwrap();

        assert!(matches!(
            client.receive(),
            Err(TransportError::Closed { code: Some(1001), .. })
        ));
    }

    #[test]
    fn finish_closes_with_protocol_error_and_reason() {
        let (server, mut client) = pair();
        let conn = Connection::new(server, "v5.user.msg".to_string());

        let err = ServerError::Transport(TransportError::MessageTooLarge { size: 10, max: 4 });
        let result = conn.finish(Err(err));
        assert!(result.is_err());

        match client.receive() {
            Err(TransportError::Closed { code, reason }) => {
                assert_eq!(code, Some(1002));
                assert!(reason.contains("message too large"));
            }
            other => panic!("expected protocol-error close, got {other:?}"),
        }
    }

    #[test]
    fn finish_after_owner_close_is_clean() {
        let (server, _client) = pair();
        let conn = Connection::new(server, "v5.user.msg".to_string());

        let result = conn.finish(Err(ServerError::Transport(TransportError::Shutdown)));
        assert!(result.is_ok());
    }
}
