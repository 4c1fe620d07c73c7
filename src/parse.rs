use byteorder::{ByteOrder, LittleEndian};

use crate::error::SourceQueryError;

/// A decoded value plus the error that stopped an optional trailing section.
///
/// `incomplete` is `None` when the whole payload was understood.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub value: T,
    pub incomplete: Option<String>,
}

impl<T> Parsed<T> {
    pub fn complete(value: T) -> Self {
        Parsed {
            value,
            incomplete: None,
        }
    }
}

/// Bounds-checked reader over a single received payload.
///
/// All multi-byte values are little-endian on the wire and are decoded
/// through [LittleEndian], so the host byte order never matters.
/// A read that would run past the end of the buffer fails with
/// [SourceQueryError::Truncated]; the buffer should be discarded after that.
#[derive(Debug, Clone)]
pub struct PayloadCursor<'a> {
    data: &'a [u8],
    /// Index of the next unread byte.
    next: usize,
}

impl<'a> PayloadCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        PayloadCursor { data, next: 0 }
    }

    /// Index of the last consumed byte, or `None` before the first read.
    pub fn position(&self) -> Option<usize> {
        self.next.checked_sub(1)
    }

    /// Total length of the underlying payload.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Take `n` bytes starting at the next unread byte.
    ///
    /// Mutates the cursor to the byte after the slice.
    fn take(&mut self, n: usize) -> Result<&'a [u8], SourceQueryError> {
        let remaining = self.remaining_unparsed_length();
        if n > remaining {
            return Err(SourceQueryError::Truncated {
                offset: self.next,
                needed: n,
                remaining,
            });
        }
        let bytes = &self.data[self.next..self.next + n];
        self.next += n;
        Ok(bytes)
    }

    pub fn skip_bytes(&mut self, n: usize) -> Result<(), SourceQueryError> {
        self.take(n).map(|_| ())
    }

    pub fn read_byte(&mut self) -> Result<u8, SourceQueryError> {
        Ok(self.take(1)?[0])
    }

    /// Read a null-terminated UTF-8 string.
    ///
    /// Mutates the cursor to sit on the terminating null byte.
    pub fn read_cstring(&mut self) -> Result<String, SourceQueryError> {
        let rest = &self.data[self.next..];
        let Some(end) = rest.iter().position(|c| *c == 0) else {
            return Err(SourceQueryError::Truncated {
                offset: self.next,
                needed: rest.len() + 1,
                remaining: rest.len(),
            });
        };
        let bytes = self.take(end + 1)?;
        Ok(std::str::from_utf8(&bytes[..end])?.to_string())
    }

    pub fn read_u16(&mut self) -> Result<u16, SourceQueryError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_i32(&mut self) -> Result<i32, SourceQueryError> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64, SourceQueryError> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub fn read_f32(&mut self) -> Result<f32, SourceQueryError> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    /// Read exactly `N` raw bytes, e.g. a challenge token.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], SourceQueryError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Number of bytes after the cursor; `0` once everything is consumed.
    pub fn remaining_unparsed_length(&self) -> usize {
        self.data.len() - self.next
    }

    /// Everything after the cursor, or an empty slice.
    pub fn unparsed_payload(&self) -> &'a [u8] {
        &self.data[self.next..]
    }
}
