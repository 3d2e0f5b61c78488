//! Little-endian cursors over shared byte buffers.
//!
//! Both cursors start at an arbitrary offset so that records can be packed
//! back to back into one buffer. Every read is bounds-checked and reports the
//! field it was reading; every write is bounds-checked against the slice.

use crate::error::{DecodeError, TandemError};
use crate::{BOOL_LEN, I32_LEN, I64_LEN};

/// Convert a length to the signed 32-bit prefix used on the wire.
pub fn length_prefix(field: &'static str, length: usize) -> Result<i32, TandemError> {
    i32::try_from(length).map_err(|_| TandemError::LengthOverflow { field, length })
}

/// Read cursor over an immutable buffer.
#[derive(Debug)]
pub struct BufferReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BufferReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Start reading at `offset`. An offset past the end is a truncation.
    pub fn at(buf: &'a [u8], offset: usize) -> Result<Self, DecodeError> {
        if offset > buf.len() {
            return Err(DecodeError::Truncated {
                field: "offset",
                offset,
                needed: 0,
                available: 0,
            });
        }
        Ok(Self { buf, pos: offset })
    }

    #[inline]
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::Truncated {
                field,
                offset: self.pos,
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], DecodeError> {
        let slice = self.take(field, N)?;
        slice.try_into().map_err(|_| DecodeError::Truncated {
            field,
            offset: self.pos,
            needed: N,
            available: slice.len(),
        })
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take_array::<1>(field)?[0])
    }

    /// Booleans are a single byte holding 0 or 1; anything else is malformed.
    pub fn read_bool(&mut self, field: &'static str) -> Result<bool, DecodeError> {
        match self.take_array::<BOOL_LEN>(field)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::Malformed {
                field,
                reason: format!("boolean byte {other:#04x}"),
            }),
        }
    }

    pub fn read_i32(&mut self, field: &'static str) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take_array::<I32_LEN>(field)?))
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take_array::<I32_LEN>(field)?))
    }

    pub fn read_i64(&mut self, field: &'static str) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take_array::<I64_LEN>(field)?))
    }

    /// Read a non-negative `int32` length or count.
    pub fn read_length(&mut self, field: &'static str) -> Result<usize, DecodeError> {
        let length = self.read_i32(field)?;
        usize::try_from(length).map_err(|_| DecodeError::NegativeLength { field, length })
    }

    pub fn read_bytes(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], DecodeError> {
        self.take(field, len)
    }

    /// Read an `int32` length followed by that many bytes.
    pub fn read_length_prefixed(&mut self, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let len = self.read_length(field)?;
        self.take(field, len)
    }

    pub fn read_string(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let raw = self.read_length_prefixed(field)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8 { field })
    }
}

/// Write cursor over a mutable buffer.
#[derive(Debug)]
pub struct BufferWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> BufferWriter<'a> {
    /// Start writing at `offset`, checking up front that `len` bytes fit.
    ///
    /// Callers pass the exact serialized length so that a destination which
    /// is too small is rejected before any byte is touched.
    pub fn reserve(buf: &'a mut [u8], offset: usize, len: usize) -> Result<Self, TandemError> {
        let available = buf.len().saturating_sub(offset);
        if offset > buf.len() || available < len {
            return Err(TandemError::BufferTooSmall {
                required: offset.saturating_add(len),
                available: buf.len(),
            });
        }
        Ok(Self { buf, pos: offset })
    }

    #[inline]
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn put_slice(&mut self, data: &[u8]) -> Result<(), TandemError> {
        let end = self.pos + data.len();
        let available = self.buf.len();
        let dst = self
            .buf
            .get_mut(self.pos..end)
            .ok_or(TandemError::BufferTooSmall {
                required: end,
                available,
            })?;
        dst.copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    pub fn put_u8(&mut self, value: u8) -> Result<(), TandemError> {
        self.put_slice(&[value])
    }

    pub fn put_bool(&mut self, value: bool) -> Result<(), TandemError> {
        self.put_u8(u8::from(value))
    }

    pub fn put_i32(&mut self, value: i32) -> Result<(), TandemError> {
        self.put_slice(&value.to_le_bytes())
    }

    pub fn put_u32(&mut self, value: u32) -> Result<(), TandemError> {
        self.put_slice(&value.to_le_bytes())
    }

    pub fn put_i64(&mut self, value: i64) -> Result<(), TandemError> {
        self.put_slice(&value.to_le_bytes())
    }

    /// Write an `int32` length prefix followed by the bytes.
    pub fn put_length_prefixed(&mut self, field: &'static str, data: &[u8]) -> Result<(), TandemError> {
        self.put_i32(length_prefix(field, data.len())?)?;
        self.put_slice(data)
    }
}
