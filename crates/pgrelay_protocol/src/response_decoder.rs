//! Streaming decoder for backend (server→client) messages. Used by the
//! proxy to follow upstream traffic, and by clients in tests.

use crate::backend::{self, BackendMessage};
use crate::error::ProtocolError;
use crate::stream::{Decoded, StreamBuffer, ValueFormat};

type Result<T> = std::result::Result<T, ProtocolError>;

/// Reassembles backend messages from arbitrary TCP chunk boundaries.
/// The backend stream has no startup phase: every message is framed.
pub struct ResponseDecoder {
    stream: StreamBuffer,
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self {
            stream: StreamBuffer::new(),
        }
    }

    /// Construct with an explicit decode mode. Binary result mode is
    /// unsupported and refused here rather than misdecoding later.
    pub fn with_format(format: ValueFormat) -> Result<Self> {
        match format {
            ValueFormat::Text => Ok(Self::new()),
            ValueFormat::Binary => Err(ProtocolError::BinaryModeUnsupported),
        }
    }

    /// Append a chunk from the socket. Invalidates raw-bytes borrows
    /// returned by earlier decode calls.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.stream.feed(chunk);
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.stream.remaining()
    }

    pub fn next_response(&mut self) -> Result<Option<Decoded<'_, BackendMessage>>> {
        self.stream.compact();
        let (code, total) = match self.stream.peek_frame()? {
            Some(frame) => frame,
            None => return Ok(None),
        };
        let message = backend::decode_body(code, &self.stream.window()[5..total])?;
        let raw = self.stream.consume(total);
        Ok(Some(Decoded::new(message, raw)))
    }
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}
