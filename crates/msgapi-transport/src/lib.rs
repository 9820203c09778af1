//! Message-framed transport contract.
//!
//! The protocol layers above only need ordered text messages, an explicit
//! close with a code and a reason, and an inbound size limit. This crate
//! defines that contract and ships two implementations:
//! - [`memory`]: an in-process pair, used by tests and embedders
//! - [`websocket`]: blocking websockets over TCP (via `tungstenite`)
//!
//! This is the lowest layer of msgapi. Everything else builds on top of
//! the [`Transport`] trait provided here.

pub mod error;
pub mod memory;
pub mod traits;
pub mod websocket;

pub use error::{Result, TransportError};
pub use memory::{MemorySender, MemoryTransport};
pub use traits::{close_reason, CloseCode, MessageSender, Transport, MAX_CLOSE_REASON_LEN};
pub use websocket::{UpgradeConfig, WebSocketSender, WebSocketTransport};
