//! Variable-byte integers and a checked cursor for decoding binary blocks.
//!
//! Integers are written 7 bits at a time, least significant group first; the
//! high bit of each byte is set when more bytes follow.

use std::io::{self, Write};
use thiserror::Error;

/// Failure to decode a value from a byte block
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{what} at byte {offset}")]
pub struct DecodeError {
    pub offset: usize,
    pub what: &'static str,
}

/// Encode a u32 as a variable-length integer
pub fn encode_varint(mut value: u32, buf: &mut Vec<u8>) {
    loop {
        if value < 0x80 {
            buf.push(value as u8);
            break;
        }
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
}

/// Encode a u64 as a variable-length integer
pub fn encode_varint_u64(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        if value < 0x80 {
            buf.push(value as u8);
            break;
        }
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
}

/// Decode a variable-length integer from a slice
/// Returns (value, bytes_consumed)
pub fn decode_varint(buf: &[u8]) -> Option<(u32, usize)> {
    let mut result: u32 = 0;
    let mut shift = 0;

    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 32 || (shift == 28 && byte & 0x70 != 0) {
            return None; // Overflow
        }

        result |= ((byte & 0x7F) as u32) << shift;

        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }

        shift += 7;
    }

    None // Incomplete
}

/// Decode a u64 variable-length integer
pub fn decode_varint_u64(buf: &[u8]) -> Option<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 64 || (shift == 63 && byte & 0x7E != 0) {
            return None;
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }

        shift += 7;
    }

    None
}

/// Read-only cursor over an immutable byte block.
///
/// Every read either advances the cursor and returns the value, or leaves the
/// cursor untouched and returns a [`DecodeError`]. End of block is never an
/// error by itself; callers check [`ByteCursor::is_empty`].
#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos.min(self.buf.len())..]
    }

    fn error(&self, what: &'static str) -> DecodeError {
        DecodeError {
            offset: self.pos,
            what,
        }
    }

    pub fn read_varint(&mut self) -> Result<u32, DecodeError> {
        let (value, consumed) =
            decode_varint(self.remaining()).ok_or_else(|| self.error("malformed varint"))?;
        self.pos += consumed;
        Ok(value)
    }

    pub fn read_varint_u64(&mut self) -> Result<u64, DecodeError> {
        let (value, consumed) =
            decode_varint_u64(self.remaining()).ok_or_else(|| self.error("malformed varint"))?;
        self.pos += consumed;
        Ok(value)
    }

    /// Advance past one varint without decoding its value
    pub fn skip_varint(&mut self) -> Result<(), DecodeError> {
        let rest = self.remaining();
        match rest.iter().position(|&b| b & 0x80 == 0) {
            Some(i) if i < 10 => {
                self.pos += i + 1;
                Ok(())
            }
            _ => Err(self.error("malformed varint")),
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| self.error("unexpected end of block"))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Read bytes up to (not including) the next `0x00`, consuming the terminator
    pub fn read_until_nul(&mut self) -> Result<&'a [u8], DecodeError> {
        let rest = self.remaining();
        let len = memchr::memchr(0, rest).ok_or_else(|| self.error("missing term terminator"))?;
        let bytes = &rest[..len];
        self.pos += len + 1;
        Ok(bytes)
    }

    pub fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.read_bytes(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(arr))
    }
}

/// Write a u32 in little-endian format
pub fn write_u32_le<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a u64 in little-endian format
pub fn write_u64_le<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}
