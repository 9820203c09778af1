//! Challenge-response authentication for Device connections.
//!
//! The server sends 32 random bytes hex-encoded as plain text. The device
//! answers with the hex-encoded HMAC-SHA-256 of the raw challenge bytes,
//! keyed by the pre-shared secret. On a match the server answers
//! `"proceed"`; anything else closes the connection with a protocol-error
//! code before the dispatch loop starts.

use std::fmt;

use hmac::{Hmac, Mac};
use msgapi_envelope::ErrorValue;
use msgapi_transport::{CloseCode, Transport, TransportError};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::{Result, ServerError};

type HmacSha256 = Hmac<Sha256>;

/// Length of the raw challenge in bytes.
pub const CHALLENGE_LEN: usize = 32;

/// Literal acknowledgment sent after a successful handshake.
pub const PROCEED: &str = "proceed";

/// Pre-shared device secret.
///
/// Opaque key material. Debug output never shows the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticationKey(Vec<u8>);

impl AuthenticationKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse a key given as a hex string.
    pub fn from_hex(text: &str) -> std::result::Result<Self, hex::FromHexError> {
        Ok(Self(hex::decode(text.trim())?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn mac(&self) -> std::result::Result<HmacSha256, ErrorValue> {
        <HmacSha256 as Mac>::new_from_slice(&self.0)
            .map_err(|_| ErrorValue::authentication_failed("unusable authentication key"))
    }
}

impl fmt::Debug for AuthenticationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthenticationKey(<redacted:{} bytes>)", self.0.len())
    }
}

/// Progress of the handshake on one Device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    NotStarted,
    AwaitingResponse,
    Authenticated,
    Failed,
}

/// Run the server side of the handshake on a negotiated connection.
///
/// `state` moves to `AwaitingResponse` once the challenge is out and ends as
/// either `Authenticated` or `Failed`. On failure the connection is already
/// closed with a protocol-error code and the reason as close text.
pub fn authenticate<T: Transport>(
    conn: &mut Connection<T>,
    key: &AuthenticationKey,
    state: &mut AuthState,
) -> Result<()> {
    let result = run_handshake(conn, key, state);

    match &result {
        Ok(()) => {
            *state = AuthState::Authenticated;
            info!(protocol = conn.protocol(), "device authenticated");
        }
        Err(err) => {
            warn!(protocol = conn.protocol(), ?state, error = %err, "device authentication failed");
            *state = AuthState::Failed;
            let _ = conn
                .transport()
                .close(CloseCode::ProtocolError, &err.to_string());
        }
    }
    result
}

fn run_handshake<T: Transport>(
    conn: &mut Connection<T>,
    key: &AuthenticationKey,
    state: &mut AuthState,
) -> Result<()> {
    let mut challenge = [0u8; CHALLENGE_LEN];
    OsRng.fill_bytes(&mut challenge);

    conn.send_text(&hex::encode(challenge))?;
    *state = AuthState::AwaitingResponse;
    debug!("challenge sent");

    let reply = conn.receive_raw()?;
    verify_response(key, &challenge, &reply).map_err(ServerError::Authentication)?;

    conn.send_text(PROCEED)?;
    Ok(())
}

fn verify_response(
    key: &AuthenticationKey,
    challenge: &[u8],
    reply: &[u8],
) -> std::result::Result<(), ErrorValue> {
    let reply = std::str::from_utf8(reply)
        .map_err(|_| ErrorValue::authentication_failed("malformed challenge response"))?;
    let response = hex::decode(reply.trim())
        .map_err(|_| ErrorValue::authentication_failed("malformed challenge response"))?;

    let mut mac = key.mac()?;
    mac.update(challenge);
    mac.verify_slice(&response)
        .map_err(|_| ErrorValue::authentication_failed("challenge response mismatch"))
}

/// Compute the hex-encoded response to a hex-encoded challenge.
pub fn respond_to_challenge(
    key: &AuthenticationKey,
    challenge_hex: &str,
) -> std::result::Result<String, ErrorValue> {
    let challenge = hex::decode(challenge_hex.trim())
        .map_err(|_| ErrorValue::invalid_input("challenge is not valid hex"))?;
    let mut mac = key.mac()?;
    mac.update(&challenge);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Run the device side of the handshake on a raw transport.
pub fn authenticate_client<T: Transport>(transport: &mut T, key: &AuthenticationKey) -> Result<()> {
    let challenge = transport.receive()?;
    let challenge = String::from_utf8_lossy(&challenge);
    let response = respond_to_challenge(key, &challenge).map_err(ServerError::Authentication)?;
    transport.send_text(&response)?;

    match transport.receive() {
        Ok(ack) if ack.as_ref() == PROCEED.as_bytes() => {
            debug!("challenge accepted");
            Ok(())
        }
        Ok(_) => Err(ServerError::Authentication(
            ErrorValue::authentication_failed("unexpected handshake acknowledgment"),
        )),
        Err(TransportError::Closed { reason, .. }) => Err(ServerError::Authentication(
            ErrorValue::authentication_failed(reason),
        )),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use msgapi_transport::memory::{pair, MemoryTransport};

    use super::*;
    use crate::negotiate::DEVICE_PROTOCOL;

    fn key() -> AuthenticationKey {
        AuthenticationKey::new(b"device-secret".to_vec())
    }

    fn device_conn() -> (Connection<MemoryTransport>, MemoryTransport) {
        let (server, client) = pair();
        (Connection::new(server, DEVICE_PROTOCOL.to_string()), client)
    }

    fn spawn_server(mut conn: Connection<MemoryTransport>) -> thread::JoinHandle<Result<()>> {
        thread::spawn(move || authenticate(&mut conn, &key(), &mut AuthState::NotStarted))
    }

    #[test]
    fn compliant_client_authenticates() {
        let (mut conn, mut client) = device_conn();
        let device = thread::spawn(move || {
            authenticate_client(&mut client, &key()).unwrap();
            client
        });

        let mut state = AuthState::NotStarted;
        authenticate(&mut conn, &key(), &mut state).unwrap();
        assert_eq!(state, AuthState::Authenticated);
        device.join().unwrap();
    }

    #[test]
    fn challenge_is_64_lowercase_hex_chars() {
        let (conn, mut client) = device_conn();
        let server = spawn_server(conn);

        let challenge = client.receive().unwrap();
        let text = std::str::from_utf8(&challenge).unwrap();
        assert_eq!(text.len(), CHALLENGE_LEN * 2);
        assert!(text
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));

        drop(client);
        assert!(server.join().unwrap().is_err());
    }

    #[test]
    fn challenges_are_fresh() {
        let mut seen = Vec::new();
        for _ in 0..2 {
            let (conn, mut client) = device_conn();
            let server = spawn_server(conn);
            seen.push(client.receive().unwrap());
            drop(client);
            let _ = server.join().unwrap();
        }
        assert_ne!(seen[0], seen[1]);
    }

    #[test]
    fn single_bit_flip_fails_without_proceed() {
        for bit in [0usize, 7, 100, 255] {
            let (mut conn, mut client) = device_conn();
            let server = thread::spawn(move || {
                let mut state = AuthState::NotStarted;
                let result = authenticate(&mut conn, &key(), &mut state);
                (result, state)
            });

            let challenge = client.receive().unwrap();
            let response = respond_to_challenge(&key(), std::str::from_utf8(&challenge).unwrap())
                .unwrap();
            let mut raw = hex::decode(response).unwrap();
            raw[bit / 8] ^= 1 << (bit % 8);
            client.send_text(&hex::encode(raw)).unwrap();

            match client.receive() {
                Err(TransportError::Closed { code, reason }) => {
                    assert_eq!(code, Some(1002));
                    assert!(reason.contains("mismatch"));
                }
                other => panic!("expected protocol-error close, got {other:?}"),
            }
            let (result, state) = server.join().unwrap();
            assert!(matches!(result, Err(ServerError::Authentication(_))));
            assert_eq!(state, AuthState::Failed);
        }
    }

    #[test]
    fn non_hex_response_is_an_authentication_failure() {
        let (conn, mut client) = device_conn();
        let server = spawn_server(conn);

        client.receive().unwrap();
        client.send_text("not hex at all").unwrap();

        match server.join().unwrap() {
            Err(ServerError::Authentication(err)) => {
                assert_eq!(err.kind(), msgapi_envelope::ErrorKind::AuthenticationFailed);
                assert_eq!(err.message(), "malformed challenge response");
            }
            other => panic!("expected authentication failure, got {other:?}"),
        }
        assert!(matches!(
            client.receive(),
            Err(TransportError::Closed { code: Some(1002), .. })
        ));
    }

    #[test]
    fn wrong_key_is_rejected_on_the_client() {
        let (conn, mut client) = device_conn();
        let server = spawn_server(conn);

        let result = authenticate_client(&mut client, &AuthenticationKey::new(b"other".to_vec()));
        assert!(matches!(result, Err(ServerError::Authentication(_))));
        assert!(server.join().unwrap().is_err());
    }

    #[test]
    fn peer_leaving_during_handshake_is_fatal() {
        let (mut conn, client) = device_conn();
        drop(client);
        let mut state = AuthState::NotStarted;
        let result = authenticate(&mut conn, &key(), &mut state);
        assert!(matches!(result, Err(ServerError::Transport(_))));
        assert_eq!(state, AuthState::Failed);
    }

    #[test]
    fn response_matches_reference_hmac() {
        // RFC 4231 test case 2.
        let key = AuthenticationKey::new(b"Jefe".to_vec());
        let challenge = hex::encode(b"what do ya want for nothing?");
        assert_eq!(
            respond_to_challenge(&key, &challenge).unwrap(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = AuthenticationKey::from_hex("deadbeef").unwrap();
        let debug = format!("{key:?}");
        assert!(!debug.contains("deadbeef"));
        assert!(debug.contains("4 bytes"));
    }
}
