//! Error types for the PG wire protocol codecs.

use thiserror::Error;

/// Errors that can occur during wire protocol encode/decode.
///
/// Every variant except `Io` is a protocol violation: the session that
/// produced it must be torn down, no recovery is attempted.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("truncated message: need {expected} bytes, have {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid UTF-8 in message body")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("missing NUL terminator in message body")]
    MissingNul,

    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("unknown authentication subcode: {0}")]
    UnknownAuthCode(i32),

    #[error("unsupported protocol version: {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("invalid describe/close target: 0x{0:02x}")]
    InvalidTarget(u8),

    #[error("invalid parameter format code: {0}")]
    InvalidValueFormat(i16),

    #[error("startup already complete")]
    StartupAlreadyComplete,

    #[error("binary decode mode is not supported")]
    BinaryModeUnsupported,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the error came from the transport rather than the wire format.
    pub fn is_io(&self) -> bool {
        matches!(self, ProtocolError::Io(_))
    }
}
