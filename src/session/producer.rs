//! Producer side of a session.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use super::{MessageSink, SessionState};
use crate::codec::Encoding;
use crate::config::SessionConfig;
use crate::layout::{EventBuffer, PackList, StructureDescriptor, layout_checksum};
use crate::protocol::{
    AllocArray, ArrayOffsets, EventFill, HistogramBook, Message, NamedString, OpenFile, Resize,
    SetupDone, SetupMode, describe_messages,
};
use crate::{EvwireError, ProtocolError, Result};

/// What the producer announces during setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerOptions {
    pub name: String,
    pub title: String,
    pub sort_key_words: u32,
    pub encoding: Encoding,
    pub setup_mode: SetupMode,
    pub named_strings: Vec<NamedString>,
    pub histograms: Vec<HistogramBook>,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            name: "events".to_string(),
            title: String::new(),
            sort_key_words: 0,
            encoding: Encoding::Plain,
            setup_mode: SetupMode::Write,
            named_strings: Vec::new(),
            histograms: Vec::new(),
        }
    }
}

impl ProducerOptions {
    /// Options taking sort-key width and encoding from a session configuration.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self { sort_key_words: config.sort_key_words, encoding: config.encoding, ..Self::default() }
    }
}

/// Writes one record type to a [`MessageSink`].
///
/// Construction emits the whole setup sequence; afterwards every
/// [`write_event`](Self::write_event) emits one event-fill message.
#[derive(Debug)]
pub struct ProducerSession<S: MessageSink> {
    sink: S,
    state: SessionState,
    descriptor: StructureDescriptor,
    pack_list: PackList,
    options: ProducerOptions,
    events_written: u64,
}

impl<S: MessageSink> ProducerSession<S> {
    /// Announce `descriptor` on `sink` and enter the ready state.
    pub fn new(sink: S, descriptor: StructureDescriptor, options: ProducerOptions) -> Result<Self> {
        let pack_list = descriptor.compile();
        let mut session = Self {
            sink,
            state: SessionState::Connected,
            descriptor,
            pack_list,
            options,
            events_written: 0,
        };
        session.state.transition(SessionState::SettingUp)?;
        session.emit_setup()?;
        session.state.transition(SessionState::Ready)?;
        info!(
            layout = session.descriptor.name(),
            fields = session.descriptor.field_count(),
            record_size = session.descriptor.record_size(),
            "Producer setup complete"
        );
        Ok(session)
    }

    fn emit_setup(&mut self) -> Result<()> {
        let d = &self.descriptor;
        let mut setup = vec![
            Message::OpenFile(OpenFile {
                sort_key_words: self.options.sort_key_words,
                name: self.options.name.clone(),
                title: self.options.title.clone(),
            }),
            Message::AllocArray(AllocArray { struct_index: 0, ntuple_index: 0, record_size: d.record_size() }),
        ];
        setup.extend(describe_messages(0, d).into_iter().map(Message::CreateField));
        setup.push(Message::Resize(Resize { struct_index: 0, record_size: d.record_size() }));
        setup.push(Message::ArrayOffsets(ArrayOffsets { struct_index: 0, words: self.pack_list.to_words() }));
        setup.extend(self.options.named_strings.iter().cloned().map(Message::NamedString));
        setup.extend(self.options.histograms.iter().cloned().map(Message::HistogramBook));
        setup.push(Message::SetupDone(SetupDone {
            mode: self.options.setup_mode,
            struct_count: 1,
            checksum: layout_checksum(d),
        }));

        for message in &setup {
            trace!(kind = %message.kind(), "Sending setup message");
            self.sink.send(&message.encode())?;
        }
        self.sink.flush()
    }

    fn require_ready(&self, what: &str) -> Result<()> {
        if self.state != SessionState::Ready {
            return Err(ProtocolError::UnexpectedMessage { kind: what.to_string(), state: self.state.to_string() }
                .into());
        }
        Ok(())
    }

    /// Encode and send one event.
    ///
    /// `sort_key` must have the width announced at setup. An out-of-range control
    /// count fails with nothing sent.
    pub fn write_event(&mut self, event: &EventBuffer, sort_key: &[u32], raw: &[u32]) -> Result<()> {
        self.require_ready("event-fill")?;
        if sort_key.len() != self.options.sort_key_words as usize {
            return Err(EvwireError::malformed(
                "event-fill",
                format!("sort key has {} words, setup announced {}", sort_key.len(), self.options.sort_key_words),
            ));
        }
        if event.len() != self.descriptor.record_size() as usize {
            return Err(EvwireError::malformed(
                "event-fill",
                format!("event buffer of {} bytes for a {} byte record", event.len(), self.descriptor.record_size()),
            ));
        }
        let fill = EventFill::pack(&self.pack_list, event, sort_key, raw, self.options.encoding)?;
        self.sink.send(&fill.to_wire())?;
        self.events_written += 1;
        Ok(())
    }

    pub fn keep_alive(&mut self) -> Result<()> {
        self.require_ready("keep-alive")?;
        self.sink.send(&Message::KeepAlive.encode())?;
        self.sink.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush()
    }

    /// Send `done` and close.
    pub fn close(&mut self) -> Result<()> {
        self.finish(Message::Done)
    }

    /// Send `abort` with a reason and close.
    pub fn abort(&mut self, reason: &str) -> Result<()> {
        self.finish(Message::Abort { reason: reason.to_string() })
    }

    fn finish(&mut self, message: Message) -> Result<()> {
        if self.state.is_closed() {
            return Ok(());
        }
        self.state.close();
        debug!(kind = %message.kind(), events = self.events_written, "Producer closing");
        self.sink.send(&message.encode())?;
        self.sink.flush()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn descriptor(&self) -> &StructureDescriptor {
        &self.descriptor
    }

    pub fn pack_list(&self) -> &PackList {
        &self.pack_list
    }

    pub fn events_written(&self) -> u64 {
        self.events_written
    }

    /// A cleared record buffer in this session's layout.
    pub fn new_event(&self) -> EventBuffer {
        EventBuffer::new(&self.descriptor)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
