//! Growable message body buffer that emits framed wire messages.

use bytes::{BufMut, BytesMut};

/// Accumulates a message body, then frames it with a type code and a
/// 4-byte big-endian length (body length + 4). The writer resets on
/// every `frame`/`startup` call so it can be reused for the next message.
#[derive(Default)]
pub struct ByteWriter {
    body: BytesMut,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self {
            body: BytesMut::with_capacity(256),
        }
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.body.put_u8(v);
    }

    pub fn put_i16(&mut self, v: i16) {
        self.body.put_i16(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.body.put_u16(v);
    }

    pub fn put_i32(&mut self, v: i32) {
        self.body.put_i32(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.body.put_u32(v);
    }

    pub fn put_slice(&mut self, v: &[u8]) {
        self.body.put_slice(v);
    }

    /// String bytes without a terminator.
    pub fn put_str(&mut self, s: &str) {
        self.body.put_slice(s.as_bytes());
    }

    /// String bytes followed by a NUL terminator.
    pub fn put_cstr(&mut self, s: &str) {
        self.body.put_slice(s.as_bytes());
        self.body.put_u8(0);
    }

    /// Emit `[code][body_len + 4][body]` and reset the writer.
    pub fn frame(&mut self, code: u8) -> BytesMut {
        let mut out = BytesMut::with_capacity(5 + self.body.len());
        out.put_u8(code);
        out.put_i32(self.body.len() as i32 + 4);
        out.extend_from_slice(&self.body);
        self.body.clear();
        out
    }

    /// Emit the unframed startup form `[body_len + 4][body]` and reset.
    pub fn startup(&mut self) -> BytesMut {
        let mut out = BytesMut::with_capacity(4 + self.body.len());
        out.put_i32(self.body.len() as i32 + 4);
        out.extend_from_slice(&self.body);
        self.body.clear();
        out
    }
}
