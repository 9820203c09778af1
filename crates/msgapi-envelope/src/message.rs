use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::value::ErrorValue;

/// Inbound envelope.
///
/// `args` is kept as raw JSON until [`MessageIn::decode_args`] is called
/// with the shape of the resolved command.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageIn {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Box<RawValue>>,
}

impl MessageIn {
    /// Decode `args` into a command-specific shape.
    ///
    /// Absent `args` decode as JSON `null`.
    pub fn decode_args<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        let raw = self.args.as_deref().map_or("null", RawValue::get);
        serde_json::from_str(raw)
    }
}

/// Outbound envelope. Exactly one shape is populated per message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageOut {
    /// Server-initiated command; no reply is expected.
    Push {
        command: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    /// Success acknowledgment carrying the server time in ms since epoch.
    Ack { now: i64 },
    /// Failure reply.
    Error { error: ErrorValue },
}

impl MessageOut {
    pub fn push<A: Serialize>(command: &str, args: &A) -> serde_json::Result<Self> {
        Ok(Self::Push {
            command: command.to_string(),
            args: serde_json::to_value(args)?,
        })
    }

    pub fn ack(now: i64) -> Self {
        Self::Ack { now }
    }

    pub fn error(error: ErrorValue) -> Self {
        Self::Error { error }
    }
}
