//! In-process transport pair.
//!
//! Both ends behave like a websocket connection: ordered text messages,
//! close frames carrying a code and reason, and an optional inbound size
//! cap. Dropping one end looks like the peer vanishing without a close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::traits::{close_reason, CloseCode, MessageSender, Transport};

#[derive(Debug)]
enum Envelope {
    Text(String),
    Close { code: u16, reason: String },
}

/// Create two connected in-memory transports.
pub fn pair() -> (MemoryTransport, MemoryTransport) {
    let (left_tx, right_rx) = mpsc::channel();
    let (right_tx, left_rx) = mpsc::channel();
    (
        MemoryTransport::new(left_tx, left_rx),
        MemoryTransport::new(right_tx, right_rx),
    )
}

/// One end of an in-memory transport pair.
#[derive(Debug)]
pub struct MemoryTransport {
    rx: Receiver<Envelope>,
    sender: MemorySender,
    max_message_size: Option<usize>,
}

/// Outbound handle of a [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct MemorySender {
    tx: Sender<Envelope>,
    closed: Arc<AtomicBool>,
}

impl MemoryTransport {
    fn new(tx: Sender<Envelope>, rx: Receiver<Envelope>) -> Self {
        Self {
            rx,
            sender: MemorySender {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            max_message_size: None,
        }
    }

    /// Currently configured inbound size cap.
    pub fn max_message_size(&self) -> Option<usize> {
        self.max_message_size
    }

    /// Whether the local side has sent a close frame.
    pub fn is_closed(&self) -> bool {
        self.sender.closed.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    type Sender = MemorySender;

    fn receive(&mut self) -> Result<Bytes> {
        if self.is_closed() {
            return Err(TransportError::Shutdown);
        }

        let received = self.rx.recv();
        // A close from a cloned sender may land while blocked in `recv`.
        if self.is_closed() {
            return Err(TransportError::Shutdown);
        }

        match received {
            Ok(Envelope::Text(text)) => {
                if let Some(max) = self.max_message_size {
                    if text.len() > max {
                        return Err(TransportError::MessageTooLarge {
                            size: text.len(),
                            max,
                        });
                    }
                }
                Ok(Bytes::from(text))
            }
            Ok(Envelope::Close { code, reason }) => Err(TransportError::Closed {
                code: Some(code),
                reason,
            }),
            Err(_) => Err(TransportError::peer_gone()),
        }
    }

    fn sender(&self) -> MemorySender {
        self.sender.clone()
    }

    fn set_max_message_size(&mut self, max: usize) -> Result<()> {
        self.max_message_size = Some(max);
        Ok(())
    }
}

impl MessageSender for MemorySender {
    fn send_text(&self, text: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }
        self.tx
            .send(Envelope::Text(text.to_string()))
            .map_err(|_| TransportError::peer_gone())
    }

    fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        trace!(%code, "closing in-memory transport");
        // The peer may already be gone; a close is still a successful local shutdown.
        let _ = self.tx.send(Envelope::Close {
            code: code.as_u16(),
            reason: close_reason(reason).to_string(),
        });
        Ok(())
    }
}
