//! Setup-class payloads.
//!
//! These describe the producer's layout and are replayed to every consumer
//! that joins, so a late consumer can rebuild the same descriptor.

use serde::{Deserialize, Serialize};

use super::payload::{PayloadReader, PayloadWriter};
use super::{RequestKind, WireMessage};
use crate::layout::StructureDescriptor;
use crate::types::{Field, ScalarType};
use crate::{EvwireError, Result};

const HAS_MAX_COUNT: u32 = 1 << 0;
const HAS_CONTROLLING: u32 = 1 << 1;

/// Opens the output: sort-key width plus descriptive names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFile {
    pub sort_key_words: u32,
    pub name: String,
    pub title: String,
}

impl OpenFile {
    pub fn to_wire(&self) -> WireMessage {
        let payload =
            PayloadWriter::new().u32(self.sort_key_words).str(&self.name).str(&self.title).finish();
        WireMessage::new(RequestKind::OpenFile, payload)
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload, "open-file");
        let value = Self { sort_key_words: r.u32()?, name: r.str()?, title: r.str()? };
        r.finish()?;
        Ok(value)
    }
}

/// Declares structure `struct_index` with its initial record size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocArray {
    pub struct_index: u32,
    pub ntuple_index: u32,
    pub record_size: u32,
}

impl AllocArray {
    pub fn to_wire(&self) -> WireMessage {
        let payload =
            PayloadWriter::new().words(&[self.struct_index, self.ntuple_index, self.record_size]).finish();
        WireMessage::new(RequestKind::AllocArray, payload)
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload, "alloc-array");
        let value = Self { struct_index: r.u32()?, ntuple_index: r.u32()?, record_size: r.u32()? };
        r.finish()?;
        Ok(value)
    }
}

/// One field of a structure, in the order it was described.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateField {
    pub struct_index: u32,
    pub field: Field,
}

impl CreateField {
    pub fn to_wire(&self) -> WireMessage {
        let f = &self.field;
        let mut flags = 0;
        if f.max_count.is_some() {
            flags |= HAS_MAX_COUNT;
        }
        if f.controlling.is_some() {
            flags |= HAS_CONTROLLING;
        }
        let payload = PayloadWriter::new()
            .words(&[self.struct_index, f.offset, f.size, f.scalar.code(), flags])
            .u32(f.max_count.unwrap_or(0))
            .str(&f.name)
            .str(f.controlling.as_deref().unwrap_or(""))
            .finish();
        WireMessage::new(RequestKind::CreateField, payload)
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload, "create-field");
        let struct_index = r.u32()?;
        let offset = r.u32()?;
        let size = r.u32()?;
        let code = r.u32()?;
        let scalar = ScalarType::from_code(code)
            .ok_or_else(|| EvwireError::malformed("create-field", format!("unknown type code {}", code)))?;
        let flags = r.u32()?;
        let max_count = r.u32()?;
        let name = r.str()?;
        let controlling = r.str()?;
        r.finish()?;

        let field = Field {
            name,
            scalar,
            offset,
            size,
            controlling: (flags & HAS_CONTROLLING != 0).then_some(controlling),
            max_count: (flags & HAS_MAX_COUNT != 0).then_some(max_count),
        };
        Ok(Self { struct_index, field })
    }
}

/// Grows a structure's record size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resize {
    pub struct_index: u32,
    pub record_size: u32,
}

impl Resize {
    pub fn to_wire(&self) -> WireMessage {
        WireMessage::new(
            RequestKind::Resize,
            PayloadWriter::new().words(&[self.struct_index, self.record_size]).finish(),
        )
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload, "resize");
        let value = Self { struct_index: r.u32()?, record_size: r.u32()? };
        r.finish()?;
        Ok(value)
    }
}

/// Compiled pack list of a structure in its word form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayOffsets {
    pub struct_index: u32,
    pub words: Vec<u32>,
}

impl ArrayOffsets {
    pub fn to_wire(&self) -> WireMessage {
        let payload = PayloadWriter::with_capacity(8 + self.words.len() * 4)
            .u32(self.struct_index)
            .u32(self.words.len() as u32)
            .words(&self.words)
            .finish();
        WireMessage::new(RequestKind::ArrayOffsets, payload)
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload, "array-offsets");
        let value = Self { struct_index: r.u32()?, words: r.counted_words()? };
        r.finish()?;
        Ok(value)
    }
}

/// Free-form key/value metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedString {
    pub key: String,
    pub value: String,
}

impl NamedString {
    pub fn to_wire(&self) -> WireMessage {
        WireMessage::new(RequestKind::NamedString, PayloadWriter::new().str(&self.key).str(&self.value).finish())
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload, "named-string");
        let value = Self { key: r.str()?, value: r.str()? };
        r.finish()?;
        Ok(value)
    }
}

/// Histogram booking forwarded to the record sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBook {
    pub id: u32,
    pub bins: u32,
    pub min: f32,
    pub max: f32,
    pub name: String,
}

impl HistogramBook {
    pub fn to_wire(&self) -> WireMessage {
        let payload = PayloadWriter::new()
            .words(&[self.id, self.bins, self.min.to_bits(), self.max.to_bits()])
            .str(&self.name)
            .finish();
        WireMessage::new(RequestKind::HistogramBook, payload)
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload, "histogram-book");
        let value = Self {
            id: r.u32()?,
            bins: r.u32()?,
            min: f32::from_bits(r.u32()?),
            max: f32::from_bits(r.u32()?),
            name: r.str()?,
        };
        r.finish()?;
        Ok(value)
    }
}

/// Direction announced by the setup-done message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupMode {
    #[default]
    Plain,
    Read,
    Write,
}

impl SetupMode {
    pub fn kind(self) -> RequestKind {
        match self {
            SetupMode::Plain => RequestKind::SetupDone,
            SetupMode::Read => RequestKind::SetupDoneRead,
            SetupMode::Write => RequestKind::SetupDoneWrite,
        }
    }

    pub fn from_kind(kind: RequestKind) -> Option<Self> {
        match kind {
            RequestKind::SetupDone => Some(SetupMode::Plain),
            RequestKind::SetupDoneRead => Some(SetupMode::Read),
            RequestKind::SetupDoneWrite => Some(SetupMode::Write),
            _ => None,
        }
    }
}

/// Ends the setup phase, carrying the layout checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupDone {
    pub mode: SetupMode,
    pub struct_count: u32,
    pub checksum: u32,
}

impl SetupDone {
    pub fn to_wire(&self) -> WireMessage {
        WireMessage::new(self.mode.kind(), PayloadWriter::new().words(&[self.struct_count, self.checksum]).finish())
    }

    pub fn parse(mode: SetupMode, payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload, "setup-done");
        let value = Self { mode, struct_count: r.u32()?, checksum: r.u32()? };
        r.finish()?;
        Ok(value)
    }
}

/// Create-field messages reproducing `descriptor`.
///
/// Controlling fields come first so a receiver replaying the messages never
/// sees an array before its control, whatever their offsets; each group is in
/// offset order.
pub fn describe_messages(struct_index: u32, descriptor: &StructureDescriptor) -> Vec<CreateField> {
    let (controlling, rest): (Vec<&Field>, Vec<&Field>) =
        descriptor.fields().iter().partition(|field| field.is_controlling());
    controlling
        .into_iter()
        .chain(rest)
        .map(|field| CreateField { struct_index, field: field.clone() })
        .collect()
}
