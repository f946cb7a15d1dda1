//! Rolling reassembly buffer shared by the two streaming decoders.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Decode mode requested at decoder construction. Binary result mode is
/// declared unsupported by contract and refused up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueFormat {
    #[default]
    Text,
    Binary,
}

/// A decoded message together with the exact wire bytes that produced it
/// (type code and length header included).
///
/// The raw slice borrows the decoder's rolling buffer, so it is valid only
/// until the next call on that decoder; callers that need the bytes past
/// that window (e.g. across an `.await`) must `raw_owned()` first.
pub struct Decoded<'a, M> {
    pub message: M,
    raw: &'a [u8],
}

impl<'a, M> Decoded<'a, M> {
    pub(crate) fn new(message: M, raw: &'a [u8]) -> Self {
        Self { message, raw }
    }

    /// The exact bytes this message was decoded from.
    pub fn raw_bytes(&self) -> &'a [u8] {
        self.raw
    }

    /// Copy the raw bytes out of the decoder buffer.
    pub fn raw_owned(&self) -> Bytes {
        Bytes::copy_from_slice(self.raw)
    }

    pub fn into_message(self) -> M {
        self.message
    }
}

/// Accumulates socket chunks and tracks the consumed prefix. The buffer
/// grows as needed; the consumed prefix is reclaimed once it passes the
/// midpoint, and the whole buffer resets when fully drained.
pub(crate) struct StreamBuffer {
    buf: BytesMut,
    offset: usize,
}

impl StreamBuffer {
    pub(crate) fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            offset: 0,
        }
    }

    pub(crate) fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    pub(crate) fn window(&self) -> &[u8] {
        &self.buf[self.offset..]
    }

    /// Reclaim the consumed prefix. Called at the top of every decode
    /// call, before any raw-bytes borrow for the next message is taken.
    pub(crate) fn compact(&mut self) {
        if self.offset == self.buf.len() {
            self.buf.clear();
            self.offset = 0;
        } else if self.offset > self.buf.len() / 2 {
            self.buf.advance(self.offset);
            self.offset = 0;
        }
    }

    /// Consume `len` bytes and return them; the slice stays valid until
    /// the next `feed`/`compact`.
    pub(crate) fn consume(&mut self, len: usize) -> &[u8] {
        let start = self.offset;
        self.offset += len;
        &self.buf[start..start + len]
    }

    /// Peek the `[code][length]` header of the next frame. Returns the
    /// code and the total frame size (`1 + length`) once the whole frame
    /// is buffered.
    pub(crate) fn peek_frame(&self) -> Result<Option<(u8, usize)>, ProtocolError> {
        let window = self.window();
        if window.len() < 5 {
            return Ok(None);
        }
        let code = window[0];
        let len = i32::from_be_bytes([window[1], window[2], window[3], window[4]]);
        if len < 4 {
            return Err(ProtocolError::InvalidFrame(format!(
                "declared length {len} for message 0x{code:02x}"
            )));
        }
        let total = 1 + len as usize;
        if window.len() < total {
            return Ok(None);
        }
        Ok(Some((code, total)))
    }

    /// Peek the length of an unframed startup packet. Returns the total
    /// packet size once it is fully buffered.
    pub(crate) fn peek_startup(&self) -> Result<Option<usize>, ProtocolError> {
        let window = self.window();
        if window.len() < 4 {
            return Ok(None);
        }
        let len = i32::from_be_bytes([window[0], window[1], window[2], window[3]]);
        if len < 8 {
            return Err(ProtocolError::InvalidFrame(format!(
                "declared startup length {len}"
            )));
        }
        if window.len() < len as usize {
            return Ok(None);
        }
        Ok(Some(len as usize))
    }
}
