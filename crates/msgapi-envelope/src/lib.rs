//! Wire envelopes for the msgapi Device and User protocols.
//!
//! Every JSON message is wrapped in an envelope:
//! - inbound `{"command": "<name>", "args": <any>}`
//! - outbound `{"now": <ms>}`, `{"error": {"kind", "message"}}` or a
//!   server push `{"command": "<name>", "args": <any>}`
//!
//! `args` stays undecoded until the command is known, so an unknown
//! command and a malformed argument payload are reported independently.

pub mod codec;
pub mod command;
pub mod error;
pub mod message;
pub mod types;
pub mod value;

pub use codec::{encode, receive_json, send_json};
pub use error::{EnvelopeError, Result};
pub use message::{MessageIn, MessageOut};
pub use types::{
    AddSensorArgs, DeviceMetadata, GetValuesArgs, Measurement, MetadataPush, RemoveSensorArgs,
    SensorMetadata, SensorValues, UpdateArgs,
};
pub use value::{ErrorKind, ErrorValue};
