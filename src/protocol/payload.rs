//! Word-oriented payload builder and parser.
//!
//! Every payload is a sequence of big-endian 32-bit words. Strings are a byte
//! length word followed by UTF-8 bytes zero-padded to the next word boundary.

use crate::{EvwireError, Result};

/// Appends words and strings to a payload.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self { buf: Vec::with_capacity(bytes) }
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn words(&mut self, values: &[u32]) -> &mut Self {
        self.buf.reserve(values.len() * 4);
        for value in values {
            self.buf.extend_from_slice(&value.to_be_bytes());
        }
        self
    }

    pub fn str(&mut self, value: &str) -> &mut Self {
        self.u32(value.len() as u32);
        self.bytes(value.as_bytes())
    }

    /// Raw bytes, zero-padded to a word boundary.
    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(value);
        self.buf.resize(self.buf.len().next_multiple_of(4), 0);
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

/// Reads words and strings back out of a payload, naming the message in errors.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    context: &'static str,
}

impl<'a> PayloadReader<'a> {
    pub fn new(bytes: &'a [u8], context: &'static str) -> Self {
        Self { bytes, pos: 0, context }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let slice = self
            .pos
            .checked_add(len)
            .and_then(|end| self.bytes.get(self.pos..end))
            .ok_or_else(|| {
                EvwireError::malformed(
                    self.context,
                    format!("needs {} bytes at {}, payload has {}", len, self.pos, self.bytes.len()),
                )
            })?;
        self.pos += len;
        Ok(slice)
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn words(&mut self, count: usize) -> Result<Vec<u32>> {
        let len = count.checked_mul(4).ok_or_else(|| {
            EvwireError::malformed(self.context, format!("word count {} overflows", count))
        })?;
        Ok(self
            .take(len)?
            .chunks_exact(4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    /// Length-prefixed word list.
    pub fn counted_words(&mut self) -> Result<Vec<u32>> {
        let count = self.u32()? as usize;
        self.words(count)
    }

    /// `len` raw bytes plus their padding.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let padded = len.checked_next_multiple_of(4).ok_or_else(|| {
            EvwireError::malformed(self.context, format!("byte length {} overflows", len))
        })?;
        Ok(&self.take(padded)?[..len])
    }

    pub fn str(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let context = self.context;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| EvwireError::malformed(context, format!("string is not UTF-8: {}", e)))
    }

    /// Optional string: empty means absent.
    pub fn opt_str(&mut self) -> Result<Option<String>> {
        Ok(Some(self.str()?).filter(|s| !s.is_empty()))
    }

    /// Bytes left unread.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Unread bytes without consuming them.
    pub fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    /// Fail unless the payload was consumed completely.
    pub fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(EvwireError::malformed(
                self.context,
                format!("{} unexpected trailing bytes", self.remaining()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_are_padded_to_words() {
        let payload = PayloadWriter::new().u32(9).str("abcde").str("").u32(1).finish();
        assert_eq!(payload.len(), 4 + 4 + 8 + 4 + 4);
        assert_eq!(&payload[8..16], b"abcde\0\0\0");

        let mut reader = PayloadReader::new(&payload, "test");
        assert_eq!(reader.u32().unwrap(), 9);
        assert_eq!(reader.str().unwrap(), "abcde");
        assert_eq!(reader.opt_str().unwrap(), None);
        assert_eq!(reader.u32().unwrap(), 1);
        reader.finish().unwrap();
    }

    #[test]
    fn overlong_string_length_is_malformed() {
        let payload = PayloadWriter::new().u32(1000).bytes(b"abc").finish();
        let err = PayloadReader::new(&payload, "named string").str().unwrap_err();
        assert!(err.to_string().contains("named string"));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let payload = PayloadWriter::new().words(&[1, 2]).finish();
        let mut reader = PayloadReader::new(&payload, "resize");
        reader.u32().unwrap();
        assert!(reader.finish().is_err());
    }
}
