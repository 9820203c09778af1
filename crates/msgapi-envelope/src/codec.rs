use msgapi_transport::{MessageSender, Transport};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::error::Result;

/// Serialize a value to its JSON text form.
pub fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Send a value as one JSON text message.
pub fn send_json<S: MessageSender, T: Serialize>(sender: &S, value: &T) -> Result<()> {
    let text = encode(value)?;
    trace!(size = text.len(), "sending json message");
    sender.send_text(&text)?;
    Ok(())
}

/// Receive one message and decode it as JSON.
pub fn receive_json<T: Transport, V: DeserializeOwned>(transport: &mut T) -> Result<V> {
    let payload = transport.receive()?;
    trace!(size = payload.len(), "received json message");
    Ok(serde_json::from_slice(&payload)?)
}

#[cfg(test)]
mod tests {
    use msgapi_transport::memory::pair;
    use msgapi_transport::TransportError;

    use super::*;
    use crate::error::EnvelopeError;
    use crate::message::{MessageIn, MessageOut};

    #[test]
    fn json_roundtrip_over_memory_transport() {
        let (left, mut right) = pair();
        send_json(&left.sender(), &MessageOut::ack(5)).unwrap();

        let received: MessageOut = receive_json(&mut right).unwrap();
        assert_eq!(received, MessageOut::ack(5));
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        let (left, mut right) = pair();
        left.send_text("{not-json").unwrap();

        let result: Result<MessageIn> = receive_json(&mut right);
        assert!(matches!(result, Err(EnvelopeError::Json(_))));
    }

    #[test]
    fn transport_close_is_a_transport_error() {
        let (left, mut right) = pair();
        drop(left);

        let result: Result<MessageIn> = receive_json(&mut right);
        assert!(matches!(
            result,
            Err(EnvelopeError::Transport(TransportError::Closed { .. }))
        ));
    }
}
