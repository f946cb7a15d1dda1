//! Cursor-based big-endian reader over a borrowed byte slice.

use crate::error::ProtocolError;

type Result<T> = std::result::Result<T, ProtocolError>;

/// A cursor over a message body. All multi-byte integers are big-endian.
///
/// `bytes` returns a sub-slice of the underlying buffer without copying;
/// `string`/`cstr` validate UTF-8 and allocate.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    pub fn has_remaining(&self) -> bool {
        self.offset < self.buf.len()
    }

    fn ensure(&self, need: usize) -> Result<()> {
        if self.remaining() < need {
            return Err(ProtocolError::Truncated {
                expected: need,
                actual: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        let v = self.buf[self.offset];
        self.offset += 1;
        Ok(v)
    }

    pub fn i16(&mut self) -> Result<i16> {
        self.ensure(2)?;
        let v = i16::from_be_bytes([self.buf[self.offset], self.buf[self.offset + 1]]);
        self.offset += 2;
        Ok(v)
    }

    pub fn u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        let v = u16::from_be_bytes([self.buf[self.offset], self.buf[self.offset + 1]]);
        self.offset += 2;
        Ok(v)
    }

    pub fn i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&self.buf[self.offset..self.offset + 4]);
        self.offset += 4;
        Ok(i32::from_be_bytes(arr))
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&self.buf[self.offset..self.offset + 4]);
        self.offset += 4;
        Ok(u32::from_be_bytes(arr))
    }

    /// A sub-slice of `len` bytes, no copy.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len)?;
        let v = &self.buf[self.offset..self.offset + len];
        self.offset += len;
        Ok(v)
    }

    /// Exactly `len` UTF-8 bytes.
    pub fn string(&mut self, len: usize) -> Result<String> {
        let raw = self.bytes(len)?;
        Ok(std::str::from_utf8(raw)?.to_string())
    }

    /// UTF-8 bytes up to (and consuming) a NUL terminator.
    pub fn cstr(&mut self) -> Result<String> {
        let rest = &self.buf[self.offset..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::MissingNul)?;
        let s = std::str::from_utf8(&rest[..nul])?.to_string();
        self.offset += nul + 1;
        Ok(s)
    }

    /// All bytes from the cursor to the end of the body.
    pub fn rest(&mut self) -> &'a [u8] {
        let v = &self.buf[self.offset..];
        self.offset = self.buf.len();
        v
    }
}
