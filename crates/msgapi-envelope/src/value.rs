use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of an in-band error reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The command name is not part of this API.
    BadCommand,
    /// The command's `args` payload has the wrong shape or type.
    InvalidInput,
    /// The operation is unsupported or the delegate reported a failure.
    OperationFailed,
    /// The challenge response did not verify.
    AuthenticationFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::BadCommand => "BadCommand",
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::OperationFailed => "OperationFailed",
            ErrorKind::AuthenticationFailed => "AuthenticationFailed",
        };
        f.write_str(name)
    }
}

/// Error payload of an `{"error": ...}` reply.
///
/// Fields are private: a value is fixed once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ErrorValue {
    kind: ErrorKind,
    message: String,
}

impl ErrorValue {
    /// Create an error value of any kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Unknown command; the message is the command name as received.
    pub fn bad_command(command: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadCommand, command)
    }

    /// Malformed argument payload.
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, reason)
    }

    /// Failed or unavailable operation.
    pub fn operation_failed(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::OperationFailed, reason)
    }

    /// The delegate for a known command is not installed.
    pub fn not_supported() -> Self {
        Self::operation_failed("not supported")
    }

    /// Challenge-response verification failed.
    pub fn authentication_failed(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthenticationFailed, reason)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_kind_by_name() {
        let value = ErrorValue::bad_command("bogus");
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "kind": "BadCommand", "message": "bogus" })
        );
    }

    #[test]
    fn not_supported_is_operation_failed() {
        let value = ErrorValue::not_supported();
        assert_eq!(value.kind(), ErrorKind::OperationFailed);
        assert_eq!(value.message(), "not supported");
    }

    #[test]
    fn display_includes_kind_and_message() {
        let value = ErrorValue::invalid_input("missing field `name`");
        assert_eq!(value.to_string(), "InvalidInput: missing field `name`");
    }

    #[test]
    fn rejects_unknown_kind() {
        let parsed: Result<ErrorValue, _> =
            serde_json::from_str(r#"{"kind":"Teapot","message":"x"}"#);
        assert!(parsed.is_err());
    }
}
