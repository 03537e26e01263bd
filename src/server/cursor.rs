//! Per-consumer read position in the chunk pool.

use super::chunk::ChunkHandle;

/// Where a consumer currently reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPhase {
    /// Replaying the init chunk at `index`.
    Init { index: usize },
    /// Reading the committed event chunk `handle`, holding one reference on it.
    Events { handle: ChunkHandle, seq: u64 },
    /// Caught up; the next chunk to read is the first one committed after `after_seq`.
    Waiting { after_seq: u64 },
}

/// Read position of one consumer.
///
/// Moving between chunks is done by [`super::ChunkPool::sync`], which keeps the
/// reference counts in step with the phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerCursor {
    phase: CursorPhase,
    offset: usize,
    skipped: u64,
    delivered: u64,
}

impl Default for ConsumerCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerCursor {
    /// A cursor at the start of the init chunks.
    pub fn new() -> Self {
        Self { phase: CursorPhase::Init { index: 0 }, offset: 0, skipped: 0, delivered: 0 }
    }

    pub fn phase(&self) -> CursorPhase {
        self.phase
    }

    /// Byte offset inside the current chunk.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Event chunks reclaimed before this consumer could read them.
    pub fn chunks_skipped(&self) -> u64 {
        self.skipped
    }

    pub fn bytes_delivered(&self) -> u64 {
        self.delivered
    }

    pub fn is_replaying_init(&self) -> bool {
        matches!(self.phase, CursorPhase::Init { .. })
    }

    /// Record `n` bytes written to the consumer.
    pub(crate) fn advance(&mut self, n: usize) {
        self.offset += n;
        self.delivered += n as u64;
    }

    pub(super) fn enter(&mut self, phase: CursorPhase) {
        self.phase = phase;
        self.offset = 0;
    }

    pub(super) fn add_skipped(&mut self, skipped: u64) {
        self.skipped += skipped;
    }
}
