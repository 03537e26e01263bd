//! Where sessions send messages and decoded records.

use std::io::Write;
use std::net::{SocketAddr, TcpStream};

use super::{SessionState, rendezvous};
use crate::config::SessionConfig;
use crate::layout::{EventBuffer, PackList};
use crate::protocol::{HistogramBook, WireMessage};
use crate::{EvwireError, Result};

/// Destination for framed messages produced by a [`super::ProducerSession`].
pub trait MessageSink {
    fn send(&mut self, message: &WireMessage) -> Result<()>;

    /// Make everything sent so far visible to the other side.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-memory capture.
impl MessageSink for Vec<WireMessage> {
    fn send(&mut self, message: &WireMessage) -> Result<()> {
        self.push(message.clone());
        Ok(())
    }
}

impl<S: MessageSink + ?Sized> MessageSink for &mut S {
    fn send(&mut self, message: &WireMessage) -> Result<()> {
        (**self).send(message)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Frames messages onto a byte stream, buffering until [`MessageSink::flush`].
#[derive(Debug)]
pub struct StreamSink<W: Write> {
    writer: W,
    buf: Vec<u8>,
}

impl<W: Write> StreamSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, buf: Vec::new() }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl StreamSink<TcpStream> {
    /// Connect to a server's producer port and send the magic.
    pub fn connect(addr: SocketAddr, config: &SessionConfig) -> Result<Self> {
        let mut state = SessionState::default();
        let stream = rendezvous::connect(addr, config, &mut state)?;
        Ok(Self::new(stream))
    }
}

impl<W: Write> MessageSink for StreamSink<W> {
    fn send(&mut self, message: &WireMessage) -> Result<()> {
        message.write_to(&mut self.buf);
        if self.buf.len() >= 64 * 1024 {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.write_all(&self.buf).map_err(|e| EvwireError::io("stream sink write", e))?;
        self.buf.clear();
        self.writer.flush().map_err(|e| EvwireError::io("stream sink flush", e))
    }
}

/// Consumer of decoded records, such as a columnar file writer.
///
/// Only `write_event` is required; metadata forwarded during setup is ignored by default.
pub trait RecordSink {
    /// One decoded event in the consumer layout, with that layout's pack list.
    fn write_event(&mut self, event: &EventBuffer, pack_list: &PackList) -> Result<()>;

    fn named_string(&mut self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn book_histogram(&mut self, _book: &HistogramBook) -> Result<()> {
        Ok(())
    }
}
