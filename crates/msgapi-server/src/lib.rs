//! Protocol core for msgapi Device and User connections.
//!
//! A connection goes through three stages:
//! 1. [`negotiate`] picks the subprotocol and caps inbound message size
//! 2. Device connections run the challenge-response [`auth`] handshake
//! 3. the dispatch loop decodes commands, calls the installed delegates
//!    and answers every message with `{"now": ..}` or `{"error": ..}`
//!
//! Servers also hand out cloneable push handles so the owner can send
//! commands to the peer while the loop is blocked waiting for input.

pub mod auth;
pub mod connection;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod listener;
pub mod negotiate;
pub mod user;

pub use auth::{
    authenticate, authenticate_client, respond_to_challenge, AuthState, AuthenticationKey,
    CHALLENGE_LEN, PROCEED,
};
pub use connection::{Connection, Pusher};
pub use device::{DeviceDelegates, DeviceHandle, DeviceServer};
pub use dispatch::DelegateResult;
pub use error::{Result, ServerError};
pub use listener::{ApiListener, ListenerConfig, PendingConnection};
pub use negotiate::{
    negotiate, select_protocol, NegotiationConfig, DEFAULT_MAX_MESSAGE_SIZE, DEVICE_PROTOCOL,
    USER_PROTOCOL,
};
pub use user::{since_from_unix_ms, UserDelegates, UserHandle, UserServer};
