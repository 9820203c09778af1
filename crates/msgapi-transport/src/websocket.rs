//! Blocking websocket transport over TCP.
//!
//! The socket is shared between the receiving side and any number of
//! [`WebSocketSender`] clones behind a mutex. Reads use a short poll
//! interval so the lock is released regularly and pushes from other
//! threads are not starved while the receiver is idle.

use std::borrow::Cow;
use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace};
use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::HeaderValue;
use tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::{HandshakeError, Message, WebSocket};

use crate::error::{Result, TransportError};
use crate::traits::{close_reason, CloseCode, MessageSender, Transport};

/// Header carrying the offered (request) or selected (response) subprotocols.
pub const SUBPROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

/// Timeouts applied around the websocket upgrade.
#[derive(Debug, Clone)]
pub struct UpgradeConfig {
    /// Read/write timeout while the upgrade handshake is in progress.
    pub timeout: Duration,
    /// How long a receive holds the socket before yielding to senders.
    pub poll_interval: Duration,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
        }
    }
}

type SharedSocket = Arc<Mutex<WebSocket<TcpStream>>>;

/// A websocket connection usable as a [`Transport`].
pub struct WebSocketTransport {
    socket: SharedSocket,
    closed: Arc<AtomicBool>,
    subprotocol: Option<String>,
}

/// Outbound handle of a [`WebSocketTransport`].
#[derive(Clone)]
pub struct WebSocketSender {
    socket: SharedSocket,
    closed: Arc<AtomicBool>,
}

/// Accept a websocket upgrade on `stream`.
///
/// `select` sees the subprotocols offered by the client and returns the one
/// to advertise in the upgrade response, if any. The upgrade itself succeeds
/// either way; deciding whether to keep the connection is left to the caller,
/// which receives the full offered list.
pub fn accept<F>(
    stream: TcpStream,
    config: &UpgradeConfig,
    select: F,
) -> Result<(WebSocketTransport, Vec<String>)>
where
    F: FnOnce(&[String]) -> Option<String>,
{
    stream.set_read_timeout(Some(config.timeout))?;
    stream.set_write_timeout(Some(config.timeout))?;

    let mut offered = Vec::new();
    let mut selected = None;
    let callback = |request: &Request,
                    mut response: Response|
     -> std::result::Result<Response, ErrorResponse> {
        offered = offered_subprotocols(request);
        selected = select(&offered);
        if let Some(protocol) = &selected {
            if let Ok(value) = HeaderValue::from_str(protocol) {
                response.headers_mut().insert(SUBPROTOCOL_HEADER, value);
            }
        }
        Ok(response)
    };

    let socket = tungstenite::accept_hdr(stream, callback).map_err(handshake_error)?;
    debug!(?offered, ?selected, "websocket upgrade accepted");

    let transport = WebSocketTransport::from_socket(socket, selected, config)?;
    Ok((transport, offered))
}

/// Connect to a websocket server at `addr`, offering `subprotocol`.
pub fn connect(
    addr: impl ToSocketAddrs,
    subprotocol: Option<&str>,
    config: &UpgradeConfig,
) -> Result<WebSocketTransport> {
    let stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(config.timeout))?;
    stream.set_write_timeout(Some(config.timeout))?;

    let url = format!("ws://{}/", stream.peer_addr()?);
    let mut request = url.into_client_request()?;
    if let Some(protocol) = subprotocol {
        let value = HeaderValue::from_str(protocol)
            .map_err(|err| TransportError::Upgrade(format!("invalid subprotocol: {err}")))?;
        request.headers_mut().insert(SUBPROTOCOL_HEADER, value);
    }

    let (socket, response) = tungstenite::client(request, stream).map_err(handshake_error)?;
    let selected = response
        .headers()
        .get(SUBPROTOCOL_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    debug!(?selected, "websocket client connected");

    WebSocketTransport::from_socket(socket, selected, config)
}

fn offered_subprotocols(request: &Request) -> Vec<String> {
    request
        .headers()
        .get_all(SUBPROTOCOL_HEADER)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|protocol| !protocol.is_empty())
        .map(str::to_string)
        .collect()
}

fn handshake_error<R>(err: HandshakeError<R>) -> TransportError
where
    R: tungstenite::handshake::HandshakeRole,
{
    match err {
        HandshakeError::Interrupted(_) => {
            TransportError::Upgrade("upgrade handshake timed out".to_string())
        }
        HandshakeError::Failure(err) => TransportError::Upgrade(err.to_string()),
    }
}

fn lock(socket: &SharedSocket) -> Result<MutexGuard<'_, WebSocket<TcpStream>>> {
    socket
        .lock()
        .map_err(|_| TransportError::Io(std::io::Error::other("websocket lock poisoned")))
}

impl WebSocketTransport {
    fn from_socket(
        socket: WebSocket<TcpStream>,
        subprotocol: Option<String>,
        config: &UpgradeConfig,
    ) -> Result<Self> {
        socket.get_ref().set_read_timeout(Some(config.poll_interval))?;
        socket.get_ref().set_write_timeout(None)?;
        Ok(Self {
            socket: Arc::new(Mutex::new(socket)),
            closed: Arc::new(AtomicBool::new(false)),
            subprotocol,
        })
    }

    /// Subprotocol agreed during the upgrade, if any.
    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.as_deref()
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("subprotocol", &self.subprotocol)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Transport for WebSocketTransport {
    type Sender = WebSocketSender;

    fn receive(&mut self) -> Result<Bytes> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Shutdown);
            }

            let message = {
                let mut socket = lock(&self.socket)?;
                match socket.read() {
                    Ok(message) => message,
                    Err(tungstenite::Error::Io(err))
                        if err.kind() == ErrorKind::WouldBlock
                            || err.kind() == ErrorKind::TimedOut =>
                    {
                        drop(socket);
                        std::thread::yield_now();
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                }
            };

            match message {
                Message::Text(text) => return Ok(Bytes::from(text)),
                Message::Binary(data) => {
                    return Err(TransportError::BinaryFrame { len: data.len() })
                }
                Message::Close(frame) => {
                    // Flush the automatic close reply; the peer is leaving anyway.
                    if let Ok(mut socket) = lock(&self.socket) {
                        let _ = socket.flush();
                    }
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    return Err(TransportError::Closed { code, reason });
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                    trace!("skipping websocket control message");
                }
            }
        }
    }

    fn sender(&self) -> WebSocketSender {
        WebSocketSender {
            socket: Arc::clone(&self.socket),
            closed: Arc::clone(&self.closed),
        }
    }

    fn set_max_message_size(&mut self, max: usize) -> Result<()> {
        let mut socket = lock(&self.socket)?;
        socket.set_config(|config| {
            config.max_message_size = Some(max);
            config.max_frame_size = Some(max);
        });
        Ok(())
    }
}

impl MessageSender for WebSocketSender {
    fn send_text(&self, text: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }
        let mut socket = lock(&self.socket)?;
        socket.send(Message::Text(text.to_string()))?;
        Ok(())
    }

    fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let frame = CloseFrame {
            code: ws_close_code(code),
            reason: Cow::Owned(close_reason(reason).to_string()),
        };

        let mut socket = lock(&self.socket)?;
        match socket.close(Some(frame)) {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => {}
            Err(err) => return Err(err.into()),
        }
        let _ = socket.flush();
        debug!(%code, "websocket closed");
        Ok(())
    }
}

fn ws_close_code(code: CloseCode) -> WsCloseCode {
    match code {
        CloseCode::GoingAway => WsCloseCode::Away,
        CloseCode::ProtocolError => WsCloseCode::Protocol,
    }
}
