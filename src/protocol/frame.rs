//! Incremental frame decoding over byte streams.

use std::io::{ErrorKind, Read};

use tracing::trace;

use super::message::{DEFAULT_MAX_MESSAGE_SIZE, HEADER_SIZE, MessageHeader, WireMessage};
use crate::{EvwireError, Result, TransportError};

const READ_CHUNK: usize = 64 * 1024;

/// Reassembles [`WireMessage`]s from arbitrarily split reads.
///
/// Partial frames stay buffered between calls, so the decoder works the same
/// over blocking and non-blocking sockets.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    start: usize,
    max_message_size: u32,
    pending: Option<MessageHeader>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl FrameDecoder {
    pub fn new(max_message_size: u32) -> Self {
        Self { buf: Vec::new(), start: 0, max_message_size, pending: None }
    }

    /// Feed raw bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.compact();
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet returned as messages.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.start
    }

    /// Pop the next complete message, if one is buffered.
    pub fn next_message(&mut self) -> Result<Option<WireMessage>> {
        let header = match self.pending {
            Some(header) => header,
            None => {
                let Some(raw) = self.buf.get(self.start..self.start + HEADER_SIZE) else {
                    return Ok(None);
                };
                let mut bytes = [0u8; HEADER_SIZE];
                bytes.copy_from_slice(raw);
                let header = MessageHeader::parse(bytes, self.max_message_size)?;
                self.start += HEADER_SIZE;
                self.pending = Some(header);
                header
            }
        };

        let len = header.payload_len();
        let Some(payload) = self.buf.get(self.start..self.start + len) else {
            return Ok(None);
        };
        let message = WireMessage::new(header.kind, payload.to_vec());
        self.start += len;
        self.pending = None;
        trace!(kind = %header.kind, length = header.length, "Decoded frame");
        Ok(Some(message))
    }

    /// Read once from `reader` into the buffer.
    ///
    /// Returns the number of bytes read; end of stream is [`TransportError::Closed`]
    /// and a non-blocking reader with no data, or an elapsed read timeout, is
    /// [`TransportError::WouldBlock`].
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> Result<usize> {
        self.compact();
        let filled = self.buf.len();
        self.buf.resize(filled + READ_CHUNK, 0);
        let result = loop {
            match reader.read(&mut self.buf[filled..]) {
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                other => break other,
            }
        };
        let read = match result {
            Ok(read) => read,
            Err(err) => {
                self.buf.truncate(filled);
                if err.kind() == ErrorKind::TimedOut {
                    return Err(TransportError::WouldBlock.into());
                }
                return Err(EvwireError::io("frame read", err));
            }
        };
        self.buf.truncate(filled + read);
        if read == 0 {
            return Err(TransportError::Closed.into());
        }
        Ok(read)
    }

    /// Block on `reader` until a whole message is available.
    pub fn read_message<R: Read>(&mut self, reader: &mut R) -> Result<WireMessage> {
        loop {
            if let Some(message) = self.next_message()? {
                return Ok(message);
            }
            self.read_from(reader)?;
        }
    }

    fn compact(&mut self) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
    }
}
