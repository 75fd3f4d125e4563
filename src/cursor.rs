//! `ParseCursor`: a bounds-checked sequential reader over a
//! borrowed byte slice, with absolute seek, little-endian integer
//! primitives, and ULEB128 decoding.

use crate::error::{Error, Result};

/// A sequential, bounds-checked cursor over a byte slice.
#[derive(Debug, Clone, Copy)]
pub struct ParseCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ParseCursor<'a> {
    /// Start a cursor at the beginning of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        ParseCursor { data, pos: 0 }
    }

    /// The total length of the underlying slice.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the underlying slice is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The current position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The number of bytes remaining after the current position.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Seek to an absolute offset. Fails if the offset is past the end of
    /// the slice (seeking exactly to `len()` is allowed, for an
    /// immediately-following zero-length read).
    pub fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.data.len() {
            return Err(Error::RangeOutOfBounds {
                    offset: offset as u64,
                    length: 0,
                    size: self.data.len() as u64,
                });
        }
        self.pos = offset;
        Ok(())
    }

    fn take_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .ok_or(Error::UnexpectedEndOfTrie)?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or(Error::UnexpectedEndOfTrie)?;
        self.pos = end;
        Ok(slice)
    }

    /// Read and return a sub-span of `n` bytes without any further
    /// interpretation.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take_bytes(n)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take_bytes(1)?[0])
    }

    /// Read a little-endian u16.
    pub fn read_u16_le(&mut self) -> Result<u16> {
        let bytes = self.take_bytes(2)?;
        Ok(u16::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Read a little-endian u32.
    pub fn read_u32_le(&mut self) -> Result<u32> {
        let bytes = self.take_bytes(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Read a little-endian u64.
    pub fn read_u64_le(&mut self) -> Result<u64> {
        let bytes = self.take_bytes(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Read a fixed-size byte array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.take_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Read a NUL-terminated UTF-8 string from the current position,
    /// capped at `max_bytes` (spec's trie-style cap). Invalid UTF-8 is
    /// decoded with the replacement character.
    pub fn read_cstr_capped(&mut self, max_bytes: usize) -> Result<String> {
        let remaining = &self.data[self.pos..];
        let limit = remaining.len().min(max_bytes);
        let nul_pos = match remaining[..limit].iter().position(|&b| b == 0) {
            Some(pos) => pos,
            None if remaining.len() > max_bytes => {
                return Err(Error::InvalidExportTrieFormat("name exceeded maximum length"));
            }
            None => return Err(Error::UnexpectedEndOfTrie),
        };
        let s = String::from_utf8_lossy(&remaining[..nul_pos]).into_owned();
        self.pos += nul_pos + 1;
        Ok(s)
    }

    /// Read an unbounded NUL-terminated UTF-8 string (used where the caller
    /// has already bounded the slice some other way, e.g. a path string
    /// table entry).
    pub fn read_cstr_unbounded(&mut self) -> Result<String> {
        let remaining = &self.data[self.pos..];
        let nul_pos = remaining
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::UnexpectedEndOfTrie)?;
        let s = String::from_utf8_lossy(&remaining[..nul_pos]).into_owned();
        self.pos += nul_pos + 1;
        Ok(s)
    }

    /// Decode a ULEB128-encoded unsigned integer, accumulating 7-bit
    /// groups until the high-bit-clear terminator.
    pub fn read_uleb128(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.read_u8()?;
            if shift < 64 {
                result |= ((byte & 0x7f) as u64) << shift;
            }
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift >= 64 {
                // The 10th byte still set the continuation bit: no 64-bit
                // value needs an 11th byte.
                return Err(Error::InvalidULEB128);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_integers() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut c = ParseCursor::new(&data);
        assert_eq!(c.read_u8().unwrap(), 0x01);
        assert_eq!(c.read_u16_le().unwrap(), 0x0302);
        assert_eq!(c.read_u32_le().unwrap(), 0x0807_0605);
    }

    #[test]
    fn short_reads_fail() {
        let data = [0x01, 0x02];
        let mut c = ParseCursor::new(&data);
        assert!(c.read_u32_le().is_err());
    }

    #[test]
    fn uleb128_round_trips_small_values() {
        // 0x109 encoded as ULEB128: 0x89 0x02
        let data = [0x89, 0x02];
        let mut c = ParseCursor::new(&data);
        assert_eq!(c.read_uleb128().unwrap(), 0x109);
    }

    #[test]
    fn uleb128_accepts_max_u64() {
        let mut data = [0xffu8; 10];
        data[9] = 0x01;
        let mut c = ParseCursor::new(&data);
        assert_eq!(c.read_uleb128().unwrap(), u64::MAX);
    }

    #[test]
    fn uleb128_rejects_overlong_encoding() {
        let data = [0xff; 11];
        let mut c = ParseCursor::new(&data);
        assert!(matches!(c.read_uleb128(), Err(Error::InvalidULEB128)));
    }

    #[test]
    fn cstr_capped_reads_name_under_cap() {
        let data = b"hello\0trailing garbage";
        let mut c = ParseCursor::new(data);
        assert_eq!(c.read_cstr_capped(16).unwrap(), "hello");
    }

    #[test]
    fn cstr_capped_rejects_name_exceeding_cap() {
        // No NUL within the first 4 bytes, but the source has more data
        // beyond the cap: this is a too-long name, not truncation.
        let data = b"abcde\0rest";
        let mut c = ParseCursor::new(data);
        assert!(matches!(
            c.read_cstr_capped(4),
            Err(Error::InvalidExportTrieFormat(_))
        ));
    }

    #[test]
    fn cstr_capped_reports_truncation_when_source_ends_under_cap() {
        // No NUL anywhere, and the slice itself ends before the cap: this
        // is genuine truncation, not a too-long name.
        let data = b"abc";
        let mut c = ParseCursor::new(data);
        assert!(matches!(
            c.read_cstr_capped(16),
            Err(Error::UnexpectedEndOfTrie)
        ));
    }

    #[test]
    fn seek_and_take() {
        let data = [1, 2, 3, 4, 5];
        let mut c = ParseCursor::new(&data);
        c.seek(2).unwrap();
        assert_eq!(c.take(2).unwrap(), &[3, 4]);
        assert!(c.seek(10).is_err());
    }
}

