//! Consumer side of a session.

use std::io::Read;
use std::net::{SocketAddr, TcpStream};

use tracing::{debug, info, trace, warn};

use super::{RecordSink, SessionState, rendezvous};
use crate::config::SessionConfig;
use crate::layout::{EventBuffer, MapList, PackList, StructureDescriptor, layout_checksum, match_layouts};
use crate::protocol::{FrameDecoder, HistogramBook, Message, NamedString, SetupMode, WireMessage};
use crate::{EvwireError, ProtocolError, Result};

/// Reads a producer's setup, then decodes its events into the consumer's layout.
///
/// The consumer layout defaults to the producer's. When a different layout is
/// requested, events decode into a staging buffer in the producer layout and
/// are projected field by field; fields the producer does not have keep their
/// clear value.
#[derive(Debug)]
pub struct ConsumerSession<R: Read = TcpStream> {
    reader: R,
    decoder: FrameDecoder,
    state: SessionState,
    config: SessionConfig,
    sort_key_words: u32,
    file_name: String,
    setup_mode: SetupMode,
    producer: StructureDescriptor,
    producer_list: PackList,
    consumer: StructureDescriptor,
    consumer_list: PackList,
    map: MapList,
    staging: EventBuffer,
    event: EventBuffer,
    sort_key: Vec<u32>,
    raw: Vec<u32>,
    named_strings: Vec<NamedString>,
    histograms: Vec<HistogramBook>,
    close_reason: Option<String>,
    events_read: u64,
}

/// Setup state accumulated until the setup-done message.
#[derive(Default)]
struct SetupBuilder {
    sort_key_words: u32,
    file_name: String,
    descriptor: Option<StructureDescriptor>,
    shipped_offsets: Option<Vec<u32>>,
    named_strings: Vec<NamedString>,
    histograms: Vec<HistogramBook>,
}

impl SetupBuilder {
    fn descriptor(&mut self, kind: &str) -> Result<&mut StructureDescriptor> {
        self.descriptor.as_mut().ok_or_else(|| {
            ProtocolError::UnexpectedMessage { kind: kind.to_string(), state: "no structure allocated".to_string() }
                .into()
        })
    }

    fn check_struct(index: u32, kind: &str) -> Result<()> {
        if index != 0 {
            return Err(EvwireError::malformed(kind, format!("structure index {} (one structure per session)", index)));
        }
        Ok(())
    }

    /// Apply one setup message; returns the setup-done message when reached.
    fn apply(&mut self, message: Message) -> Result<Option<(SetupMode, u32)>> {
        match message {
            Message::OpenFile(open) => {
                self.sort_key_words = open.sort_key_words;
                self.file_name = open.name;
            }
            Message::AllocArray(alloc) => {
                Self::check_struct(alloc.struct_index, "alloc-array")?;
                self.descriptor = Some(StructureDescriptor::with_record_size(
                    self.file_name.clone(),
                    alloc.record_size,
                ));
            }
            Message::CreateField(create) => {
                Self::check_struct(create.struct_index, "create-field")?;
                let f = create.field;
                self.descriptor("create-field")?.describe(
                    f.offset,
                    f.size,
                    f.scalar,
                    &f.name,
                    f.controlling.as_deref(),
                    f.max_count,
                )?;
            }
            Message::Resize(resize) => {
                Self::check_struct(resize.struct_index, "resize")?;
                self.descriptor("resize")?.resize(resize.record_size)?;
            }
            Message::ArrayOffsets(offsets) => {
                Self::check_struct(offsets.struct_index, "array-offsets")?;
                self.shipped_offsets = Some(offsets.words);
            }
            Message::NamedString(named) => self.named_strings.push(named),
            Message::HistogramBook(book) => self.histograms.push(book),
            Message::KeepAlive => {}
            Message::SetupDone(done) => return Ok(Some((done.mode, done.checksum))),
            Message::Abort { reason } => return Err(ProtocolError::Aborted { reason }.into()),
            other => {
                return Err(ProtocolError::UnexpectedMessage {
                    kind: other.kind().to_string(),
                    state: SessionState::SettingUp.to_string(),
                }
                .into());
            }
        }
        Ok(None)
    }
}

impl ConsumerSession<TcpStream> {
    /// Connect to a server and complete setup.
    ///
    /// `layout` selects the consumer's own record layout; `None` adopts the producer's.
    pub fn connect(addr: SocketAddr, config: SessionConfig, layout: Option<StructureDescriptor>) -> Result<Self> {
        let mut state = SessionState::default();
        let stream = rendezvous::connect(addr, &config, &mut state)?;
        let nonblocking = config.nonblocking;
        let session = Self::handshake(stream, state, config, layout)?;
        if nonblocking {
            session.set_nonblocking(true)?;
        }
        Ok(session)
    }

    /// Switch the socket mode; partial frames stay buffered either way.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.reader.set_nonblocking(nonblocking).map_err(|e| EvwireError::io("set nonblocking", e))
    }

    /// Bound blocking reads so callers can poll for cancellation.
    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.reader.set_read_timeout(timeout).map_err(|e| EvwireError::io("set read timeout", e))
    }
}

impl<R: Read> ConsumerSession<R> {
    /// Run setup over an already connected reader whose magic exchange is done.
    pub fn from_reader(reader: R, config: SessionConfig, layout: Option<StructureDescriptor>) -> Result<Self> {
        Self::handshake(reader, SessionState::Connected, config, layout)
    }

    fn handshake(
        mut reader: R,
        mut state: SessionState,
        config: SessionConfig,
        layout: Option<StructureDescriptor>,
    ) -> Result<Self> {
        state.transition(SessionState::SettingUp)?;
        let mut decoder = FrameDecoder::new(config.max_message_size);
        let mut setup = SetupBuilder::default();

        let (mode, sent_checksum) = loop {
            let wire = decoder.read_message(&mut reader)?;
            let message = Message::decode(&wire, setup.sort_key_words)?;
            trace!(kind = %wire.kind(), "Setup message");
            if let Some(done) = setup.apply(message)? {
                break done;
            }
        };

        let producer = setup.descriptor.take().ok_or_else(|| ProtocolError::UnexpectedMessage {
            kind: mode.kind().to_string(),
            state: "no structure allocated".to_string(),
        })?;
        let producer_list = producer.compile();
        if let Some(words) = &setup.shipped_offsets {
            let shipped = PackList::from_words(words, producer.record_size())
                .map_err(|_| ProtocolError::PackListMismatch)?;
            if shipped != producer_list {
                return Err(ProtocolError::PackListMismatch.into());
            }
        }
        let local = layout_checksum(&producer);
        if local != sent_checksum {
            return Err(ProtocolError::ChecksumMismatch { sent: sent_checksum, local }.into());
        }

        let consumer = layout.unwrap_or_else(|| producer.clone());
        let map = match_layouts(&producer, &consumer);
        if !map.is_exact() {
            debug!(producer = producer.name(), consumer = consumer.name(), "Layouts differ, projecting events");
        }
        state.transition(SessionState::Ready)?;
        info!(
            layout = producer.name(),
            fields = producer.field_count(),
            exact = map.is_exact(),
            "Consumer setup complete"
        );

        Ok(Self {
            reader,
            decoder,
            state,
            config,
            sort_key_words: setup.sort_key_words,
            file_name: setup.file_name,
            setup_mode: mode,
            staging: EventBuffer::new(&producer),
            event: EventBuffer::new(&consumer),
            consumer_list: consumer.compile(),
            producer,
            producer_list,
            consumer,
            map,
            sort_key: Vec::new(),
            raw: Vec::new(),
            named_strings: setup.named_strings,
            histograms: setup.histograms,
            close_reason: None,
            events_read: 0,
        })
    }

    /// Wait for the next event.
    ///
    /// Returns `Ok(None)` once the producer is done (or aborted, unless strict
    /// abort is configured). In non-blocking mode an incomplete frame is
    /// [`crate::TransportError::WouldBlock`] and stays buffered.
    pub fn fetch_event(&mut self) -> Result<Option<&EventBuffer>> {
        Ok(if self.advance()? { Some(&self.event) } else { None })
    }

    fn advance(&mut self) -> Result<bool> {
        if self.state.is_closed() {
            return Ok(false);
        }
        match self.next_event() {
            Ok(more) => Ok(more),
            Err(err) => {
                if err.is_session_fatal() {
                    warn!(error = %err, "Consumer session failed");
                    self.state.close();
                }
                Err(err)
            }
        }
    }

    fn next_event(&mut self) -> Result<bool> {
        loop {
            let wire = self.decoder.read_message(&mut self.reader)?;
            match Message::decode(&wire, self.sort_key_words)? {
                Message::EventFill(fill) => {
                    if self.map.is_exact() {
                        fill.unpack_into(&self.producer_list, &mut self.event)?;
                    } else {
                        fill.unpack_into(&self.producer_list, &mut self.staging)?;
                        self.event.clear();
                        self.map.project(&self.staging, &mut self.event)?;
                    }
                    self.sort_key = fill.sort_key;
                    self.raw = fill.raw;
                    self.events_read += 1;
                    return Ok(true);
                }
                Message::KeepAlive => trace!("Keep-alive"),
                Message::NamedString(named) => self.named_strings.push(named),
                Message::HistogramBook(book) => self.histograms.push(book),
                Message::Done => {
                    info!(events = self.events_read, "Producer done");
                    self.state.close();
                    return Ok(false);
                }
                Message::Abort { reason } => {
                    warn!(%reason, events = self.events_read, "Producer aborted");
                    self.state.close();
                    self.close_reason = Some(reason.clone());
                    if self.config.strict_abort {
                        return Err(ProtocolError::Aborted { reason }.into());
                    }
                    return Ok(false);
                }
                other => {
                    return Err(ProtocolError::UnexpectedMessage {
                        kind: other.kind().to_string(),
                        state: self.state.to_string(),
                    }
                    .into());
                }
            }
        }
    }

    /// Forward setup metadata and then every event to `sink` until the stream ends.
    ///
    /// Returns the number of events written.
    pub fn pump_into<K: RecordSink + ?Sized>(&mut self, sink: &mut K) -> Result<u64> {
        for named in &self.named_strings {
            sink.named_string(&named.key, &named.value)?;
        }
        for book in &self.histograms {
            sink.book_histogram(book)?;
        }
        let mut written = 0;
        while self.advance()? {
            sink.write_event(&self.event, &self.consumer_list)?;
            written += 1;
        }
        Ok(written)
    }

    /// Take one raw framed message without decoding it.
    pub fn next_wire(&mut self) -> Result<WireMessage> {
        self.decoder.read_message(&mut self.reader)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn producer_layout(&self) -> &StructureDescriptor {
        &self.producer
    }

    pub fn layout(&self) -> &StructureDescriptor {
        &self.consumer
    }

    pub fn pack_list(&self) -> &PackList {
        &self.consumer_list
    }

    pub fn map_list(&self) -> &MapList {
        &self.map
    }

    /// Most recently decoded event.
    pub fn event(&self) -> &EventBuffer {
        &self.event
    }

    /// Sort key of the most recent event.
    pub fn sort_key(&self) -> &[u32] {
        &self.sort_key
    }

    /// Ancillary raw block of the most recent event.
    pub fn raw(&self) -> &[u32] {
        &self.raw
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn setup_mode(&self) -> SetupMode {
        self.setup_mode
    }

    pub fn named_strings(&self) -> &[NamedString] {
        &self.named_strings
    }

    pub fn histograms(&self) -> &[HistogramBook] {
        &self.histograms
    }

    /// Reason given by an aborting producer.
    pub fn close_reason(&self) -> Option<&str> {
        self.close_reason.as_deref()
    }

    pub fn events_read(&self) -> u64 {
        self.events_read
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }
}
