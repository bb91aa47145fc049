// SPDX-License-Identifier: MIT
//! Endian-aware primitive codec
//!
//! Shapefile headers mix big-endian and little-endian fields, so every read
//! and write names its byte order explicitly. Values are assembled one byte
//! at a time (low byte first for little-endian) so the result never depends
//! on the host's native word order.

use crate::error::{Result, ShapefileError};

/// Byte order of a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

/// Assemble an unsigned integer from `N` bytes in the given order
#[inline]
fn assemble<const N: usize>(bytes: &[u8], order: ByteOrder) -> u64 {
    let mut value = 0u64;
    match order {
        ByteOrder::Little => {
            for (i, b) in bytes.iter().take(N).enumerate() {
                value |= (*b as u64) << (8 * i);
            }
        }
        ByteOrder::Big => {
            for b in bytes.iter().take(N) {
                value = (value << 8) | *b as u64;
            }
        }
    }
    value
}

/// Split the low `N` bytes of `value` into the given order
#[inline]
fn disassemble<const N: usize>(value: u64, order: ByteOrder, out: &mut Vec<u8>) {
    match order {
        ByteOrder::Little => {
            for i in 0..N {
                out.push((value >> (8 * i)) as u8);
            }
        }
        ByteOrder::Big => {
            for i in (0..N).rev() {
                out.push((value >> (8 * i)) as u8);
            }
        }
    }
}

/// Forward-only reader over a borrowed byte slice
///
/// Running past the end is reported as [`ShapefileError::Truncated`], never
/// as a zero-filled value.
#[derive(Debug)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset from the start of the slice
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ShapefileError::Truncated {
                context,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Advance without decoding
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n, "skip").map(|_| ())
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n, "byte run")
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1, "byte")?[0])
    }

    pub fn read_i16(&mut self, order: ByteOrder) -> Result<i16> {
        let bytes = self.take(2, "int16")?;
        Ok(assemble::<2>(bytes, order) as u16 as i16)
    }

    pub fn read_i32(&mut self, order: ByteOrder) -> Result<i32> {
        let bytes = self.take(4, "int32")?;
        Ok(assemble::<4>(bytes, order) as u32 as i32)
    }

    pub fn read_f64(&mut self, order: ByteOrder) -> Result<f64> {
        let bytes = self.take(8, "float64")?;
        Ok(f64::from_bits(assemble::<8>(bytes, order)))
    }
}

/// Growable byte sink with endian-aware writes
#[derive(Debug, Default, Clone)]
pub struct ByteSink {
    buf: Vec<u8>,
}

impl ByteSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-allocate exactly `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_i16(&mut self, value: i16, order: ByteOrder) {
        disassemble::<2>(value as u16 as u64, order, &mut self.buf);
    }

    pub fn write_i32(&mut self, value: i32, order: ByteOrder) {
        disassemble::<4>(value as u32 as u64, order, &mut self.buf);
    }

    pub fn write_f64(&mut self, value: f64, order: ByteOrder) {
        disassemble::<8>(value.to_bits(), order, &mut self.buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_i32_big_endian() {
        // 9994 is the shapefile signature
        let data = [0x00, 0x00, 0x27, 0x0A];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_i32(ByteOrder::Big).unwrap(), 9994);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_read_i32_little_endian() {
        let data = [0xE8, 0x03, 0x00, 0x00];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_i32(ByteOrder::Little).unwrap(), 1000);
    }

    #[test]
    fn test_negative_values() {
        let mut sink = ByteSink::new();
        sink.write_i32(-2, ByteOrder::Little);
        sink.write_i16(-300, ByteOrder::Big);
        assert_eq!(sink.as_slice(), &[0xFE, 0xFF, 0xFF, 0xFF, 0xFE, 0xD4]);

        let mut cursor = ByteCursor::new(sink.as_slice());
        assert_eq!(cursor.read_i32(ByteOrder::Little).unwrap(), -2);
        assert_eq!(cursor.read_i16(ByteOrder::Big).unwrap(), -300);
    }

    #[test]
    fn test_f64_matches_native_encoding() {
        let value = -20.25f64;
        let mut sink = ByteSink::new();
        sink.write_f64(value, ByteOrder::Little);
        sink.write_f64(value, ByteOrder::Big);
        assert_eq!(&sink.as_slice()[..8], &value.to_le_bytes());
        assert_eq!(&sink.as_slice()[8..], &value.to_be_bytes());
    }

    #[test]
    fn test_truncation_is_reported() {
        let data = [0x01, 0x02, 0x03];
        let mut cursor = ByteCursor::new(&data);
        let err = cursor.read_i32(ByteOrder::Little).unwrap_err();
        match err {
            ShapefileError::Truncated {
                needed, available, ..
            } => {
                assert_eq!(needed, 4);
                assert_eq!(available, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        // A failed read does not advance the cursor
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_skip_and_position() {
        let data = [0u8; 16];
        let mut cursor = ByteCursor::new(&data);
        cursor.skip(12).unwrap();
        assert_eq!(cursor.position(), 12);
        assert_eq!(cursor.remaining(), 4);
        assert!(cursor.skip(5).is_err());
    }
}
