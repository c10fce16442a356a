//! Error types for the bleuart library.

use thiserror::Error;

/// The main error type for bleuart operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport driver reported a failure.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Inbound byte reassembly error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A received line could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The link to the peer is not established.
    #[error("not connected")]
    NotConnected,

    /// The session is not running and does not accept commands.
    #[error("session not running")]
    NotRunning,

    /// A response waiter is already registered under this keyword.
    #[error("a response for '{keyword}' is already pending")]
    PendingExists { keyword: String },

    /// The peer never answered the settings handshake.
    #[error("handshake timed out")]
    HandshakeTimeout,
}

impl Error {
    /// Creates a transport error from any displayable driver failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

/// Inbound reassembly errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// A complete line was not valid UTF-8.
    #[error("line is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A line grew past the maximum length and was discarded.
    #[error("line too long: {size} bytes (max {max})")]
    TooLong { size: usize, max: usize },
}

/// Line decoding errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The line carried no keyword.
    #[error("empty line")]
    EmptyLine,

    /// A required argument is missing.
    #[error("'{keyword}' is missing argument {index}")]
    MissingArgument { keyword: String, index: usize },

    /// An argument is not a valid integer.
    #[error("invalid integer '{value}'")]
    InvalidInteger { value: String },

    /// An argument is not a valid decimal number.
    #[error("invalid decimal '{value}'")]
    InvalidFloat { value: String },

    /// A clock value does not match `H,M,S,d,m,y`.
    #[error("invalid clock '{value}'")]
    InvalidClock { value: String },

    /// A comma-separated argument has the wrong number of fields.
    #[error("expected {expected} fields, got {got}")]
    FieldCount { expected: usize, got: usize },
}

/// Result type alias for bleuart operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            Error::transport("peer gone").to_string(),
            "transport error: peer gone"
        );
        assert_eq!(
            Error::from(DecodeError::MissingArgument {
                keyword: "battery".into(),
                index: 0
            })
            .to_string(),
            "decode error: 'battery' is missing argument 0"
        );
    }

    #[test]
    fn test_frame_error_nesting() {
        let err = Error::from(FrameError::TooLong { size: 600, max: 512 });
        assert!(matches!(err, Error::Frame(FrameError::TooLong { size: 600, .. })));
        assert!(err.to_string().contains("line too long: 600 bytes (max 512)"));
    }
}
