use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use msgapi_transport::websocket::{self, UpgradeConfig};
use msgapi_transport::WebSocketTransport;
use tracing::debug;

use crate::connection::Connection;
use crate::device::{DeviceDelegates, DeviceServer};
use crate::error::Result;
use crate::negotiate::{
    negotiate, select_protocol, NegotiationConfig, DEVICE_PROTOCOL, USER_PROTOCOL,
};
use crate::user::{UserDelegates, UserServer};

/// Configuration for accepted connections.
#[derive(Debug, Clone, Default)]
pub struct ListenerConfig {
    pub upgrade: UpgradeConfig,
    pub negotiation: NegotiationConfig,
}

/// Accepts websocket connections and negotiates a msgapi subprotocol.
#[derive(Debug)]
pub struct ApiListener {
    listener: TcpListener,
    config: ListenerConfig,
}

impl ApiListener {
    /// Bind a TCP listener.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(msgapi_transport::TransportError::from)?;
        Ok(Self {
            listener,
            config: ListenerConfig::default(),
        })
    }

    /// Override listener config.
    pub fn with_config(mut self, config: ListenerConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the inbound message cap applied after negotiation.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.config.negotiation.max_message_size = max;
        self
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Bound socket address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self
            .listener
            .local_addr()
            .map_err(msgapi_transport::TransportError::from)?)
    }

    /// Accept the next TCP connection without upgrading it.
    ///
    /// The upgrade can then run on another thread, so a peer that stalls
    /// during the handshake does not hold up the accept loop.
    pub fn accept(&self) -> Result<PendingConnection> {
        let (stream, peer) = self
            .listener
            .accept()
            .map_err(msgapi_transport::TransportError::from)?;
        debug!(%peer, "tcp connection accepted");
        Ok(PendingConnection {
            stream,
            peer,
            config: self.config.clone(),
        })
    }

    /// Accept and upgrade the next connection as a Device API connection.
    ///
    /// Authentication runs later, in [`DeviceServer::run`].
    pub fn accept_device(
        &self,
        delegates: DeviceDelegates,
    ) -> Result<DeviceServer<WebSocketTransport>> {
        self.accept()?.upgrade_device(delegates)
    }

    /// Accept and upgrade the next connection as a User API connection.
    pub fn accept_user(&self, delegates: UserDelegates) -> Result<UserServer<WebSocketTransport>> {
        self.accept()?.upgrade_user(delegates)
    }
}

/// A TCP connection that has not been upgraded yet.
#[derive(Debug)]
pub struct PendingConnection {
    stream: TcpStream,
    peer: SocketAddr,
    config: ListenerConfig,
}

impl PendingConnection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Upgrade and negotiate the Device API.
    pub fn upgrade_device(
        self,
        delegates: DeviceDelegates,
    ) -> Result<DeviceServer<WebSocketTransport>> {
        let conn = self.upgrade(&[DEVICE_PROTOCOL])?;
        Ok(DeviceServer::new(conn, delegates))
    }

    /// Upgrade and negotiate the User API.
    pub fn upgrade_user(self, delegates: UserDelegates) -> Result<UserServer<WebSocketTransport>> {
        let conn = self.upgrade(&[USER_PROTOCOL])?;
        Ok(UserServer::new(conn, delegates))
    }

    /// Run the websocket upgrade and negotiate one of `supported`.
    pub fn upgrade(self, supported: &[&str]) -> Result<Connection<WebSocketTransport>> {
        let (transport, offered) =
            websocket::accept(self.stream, &self.config.upgrade, |offered| {
                select_protocol(offered, supported).map(str::to_string)
            })?;
        debug!(peer = %self.peer, "websocket upgrade complete");
        negotiate(transport, &offered, supported, &self.config.negotiation)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::thread;
    use std::time::{Duration, Instant};

    use msgapi_envelope::{ErrorValue, MessageOut};
    use msgapi_transport::{Transport, TransportError};

    use super::*;
    use crate::auth::{authenticate_client, AuthenticationKey};
    use crate::error::ServerError;

    fn key() -> AuthenticationKey {
        AuthenticationKey::new(b"loopback-secret".to_vec())
    }

    #[test]
    fn device_flow_over_websocket() {
        let listener = ApiListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let delegates = DeviceDelegates::new().on_update(|values| {
                assert!(values.contains_key("s1"));
                Ok(())
            });
            let mut device = listener.accept_device(delegates).unwrap();
            device.run(&key())
        });

        let mut client =
            websocket::connect(addr, Some(DEVICE_PROTOCOL), &UpgradeConfig::default()).unwrap();
        assert_eq!(client.subprotocol(), Some(DEVICE_PROTOCOL));
        authenticate_client(&mut client, &key()).unwrap();

        let update =
            r#"{"command":"update","args":{"values":{"s1":[{"timestamp":0,"value":1.0}]}}}"#;
        client.send_text(update).unwrap();
        let reply: MessageOut = serde_json::from_slice(&client.receive().unwrap()).unwrap();
        assert!(matches!(reply, MessageOut::Ack { .. }));

        client.send_text(r#"{"command":"bogus"}"#).unwrap();
        let reply: MessageOut = serde_json::from_slice(&client.receive().unwrap()).unwrap();
        assert_eq!(reply, MessageOut::error(ErrorValue::bad_command("bogus")));

        client
            .close(msgapi_transport::CloseCode::GoingAway, "bye")
            .unwrap();
        let result = server.join().unwrap();
        assert!(result.unwrap_err().is_peer_closed());
    }

    /// Upgrade by hand so the client accepts a response without a subprotocol.
    fn raw_upgrade(
        addr: std::net::SocketAddr,
        protocol: &str,
    ) -> tungstenite::WebSocket<TcpStream> {
        let mut stream = TcpStream::connect(addr).unwrap();
        write!(
            stream,
            "GET / HTTP/1.1\r\n\
             Host: {addr}\r\n\
             Connection: Upgrade\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Version: 13\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Protocol: {protocol}\r\n\r\n"
        )
        .unwrap();

        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).unwrap();
            head.push(byte[0]);
        }
        let head = String::from_utf8(head).unwrap();
        assert!(head.starts_with("HTTP/1.1 101"));
        assert!(!head.contains("Sec-WebSocket-Protocol"));

        tungstenite::WebSocket::from_raw_socket(stream, tungstenite::protocol::Role::Client, None)
    }

    #[test]
    fn unsupported_subprotocol_is_closed_with_protocol_error() {
        let listener = ApiListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || listener.accept_device(DeviceDelegates::new()));

        let mut client = raw_upgrade(addr, "v1.device.msg");
        match client.read().unwrap() {
            tungstenite::Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1002);
            }
            other => panic!("expected protocol-error close, got {other:?}"),
        }

        assert!(matches!(
            server.join().unwrap(),
            Err(ServerError::NegotiationFailed { .. })
        ));
    }

    #[test]
    fn tungstenite_client_rejects_missing_subprotocol() {
        let listener = ApiListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || listener.accept_user(UserDelegates::new()));

        let result = websocket::connect(addr, Some("v4.user.msg"), &UpgradeConfig::default());
        assert!(matches!(result, Err(TransportError::Upgrade(_))));
        assert!(matches!(
            server.join().unwrap(),
            Err(ServerError::NegotiationFailed { .. })
        ));
    }

    #[test]
    fn stalled_upgrade_does_not_hold_up_the_next_connection() {
        let listener = ApiListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let silent = TcpStream::connect(addr).unwrap();
        let stalled = listener.accept().unwrap();
        assert_eq!(stalled.peer_addr(), silent.local_addr().unwrap());
        let stalled = thread::spawn(move || stalled.upgrade_user(UserDelegates::new()));

        let client = thread::spawn(move || {
            websocket::connect(addr, Some(USER_PROTOCOL), &UpgradeConfig::default())
        });
        let started = Instant::now();
        let user = listener
            .accept()
            .unwrap()
            .upgrade_user(UserDelegates::new())
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(user.connection().protocol(), USER_PROTOCOL);
        assert!(client.join().unwrap().is_ok());

        drop(silent);
        assert!(stalled.join().unwrap().is_err());
    }

    #[test]
    fn user_connection_needs_no_handshake() {
        let listener = ApiListener::bind("127.0.0.1:0").unwrap().with_max_message_size(64);
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let mut user = listener
                .accept_user(UserDelegates::new().on_get_values(|_, _| Ok(())))
                .unwrap();
            user.run()
        });

        let mut client =
            websocket::connect(addr, Some(USER_PROTOCOL), &UpgradeConfig::default()).unwrap();
        client
            .send_text(r#"{"command":"getValues","args":{"sinceUnixMs":0,"withMetadata":true}}"#)
            .unwrap();
        let reply: MessageOut = serde_json::from_slice(&client.receive().unwrap()).unwrap();
        assert!(matches!(reply, MessageOut::Ack { .. }));

        client.send_text(&"x".repeat(256)).unwrap();
        let result = server.join().unwrap();
        assert!(matches!(
            result,
            Err(ServerError::Transport(TransportError::MessageTooLarge { .. }))
        ));
    }
}
