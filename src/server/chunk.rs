//! Refcounted chunk pool.
//!
//! Producer messages are appended, already framed, to an open chunk. Committing
//! the chunk makes it visible to consumers. Setup messages go to init chunks that
//! every consumer replays on join; everything else goes to event chunks that are
//! numbered in commit order and can be reclaimed once no cursor references them.
//!
//! Chunks live in an arena indexed by [`ChunkHandle`], with a free list of slots.
//! Init chunks are pinned for the life of the pool and are not reference counted.

use std::collections::VecDeque;

use tracing::{debug, trace};

use super::cursor::{ConsumerCursor, CursorPhase};
use crate::CapacityError;
use crate::protocol::WireMessage;

/// Index of a chunk in the pool arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkHandle(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkClass {
    Init,
    Event,
}

#[derive(Debug)]
struct Chunk {
    bytes: Vec<u8>,
    /// Bytes charged against the ceiling.
    reserved: usize,
    refcount: u32,
}

#[derive(Debug)]
pub struct ChunkPool {
    slots: Vec<Option<Chunk>>,
    free: Vec<usize>,
    init: Vec<ChunkHandle>,
    /// Committed event chunks, ascending by sequence number.
    events: VecDeque<(u64, ChunkHandle)>,
    open_init: Option<ChunkHandle>,
    open_event: Option<ChunkHandle>,
    setup_complete: bool,
    chunk_size: usize,
    ceiling: usize,
    in_use: usize,
    peak: usize,
    next_seq: u64,
    allocated: u64,
    reclaimed: u64,
}

impl ChunkPool {
    pub fn new(chunk_size: usize, ceiling: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            init: Vec::new(),
            events: VecDeque::new(),
            open_init: None,
            open_event: None,
            setup_complete: false,
            chunk_size,
            ceiling,
            in_use: 0,
            peak: 0,
            next_seq: 1,
            allocated: 0,
            reclaimed: 0,
        }
    }

    /// Append one framed message.
    ///
    /// Setup messages are stored in init chunks until the setup-done message, which
    /// commits them. A message that does not fit the open chunk commits it and
    /// starts a new one.
    pub fn append(&mut self, message: &WireMessage) -> Result<(), CapacityError> {
        let len = message.encoded_len();
        if len > self.ceiling {
            return Err(CapacityError::RequestTooLarge { requested: len, ceiling: self.ceiling });
        }
        let class = if !self.setup_complete && message.kind().is_setup() {
            ChunkClass::Init
        } else {
            ChunkClass::Event
        };

        let handle = match self.open(class) {
            Some(handle) if self.fits(handle, len) => handle,
            _ => {
                self.seal(class);
                let handle = self.allocate(len)?;
                *self.open_mut(class) = Some(handle);
                handle
            }
        };
        if let Some(chunk) = self.chunk_mut(handle) {
            message.write_to(&mut chunk.bytes);
        }
        trace!(kind = %message.kind(), len, ?class, "Appended message");

        if class == ChunkClass::Init && message.kind().is_setup_done() {
            self.seal(ChunkClass::Init);
            self.setup_complete = true;
            debug!(init_chunks = self.init.len(), "Init chunks committed");
        }
        Ok(())
    }

    /// Commit the open event chunk, if it holds anything.
    pub fn commit(&mut self) {
        self.seal(ChunkClass::Event);
    }

    /// Commit everything, including an unfinished setup.
    pub fn seal_all(&mut self) {
        self.seal(ChunkClass::Init);
        self.setup_complete = true;
        self.seal(ChunkClass::Event);
    }

    /// Free every chunk. Cursors must be discarded first.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.init.clear();
        self.events.clear();
        self.open_init = None;
        self.open_event = None;
        self.in_use = 0;
    }

    /// Move `cursor` onto the next readable chunk if its current one is exhausted.
    ///
    /// Returns the number of event chunks skipped because they were reclaimed.
    pub fn sync(&mut self, cursor: &mut ConsumerCursor) -> u64 {
        let mut skipped = 0;
        loop {
            match cursor.phase() {
                CursorPhase::Init { index } => {
                    if !self.setup_complete {
                        break;
                    }
                    match self.init.get(index).and_then(|h| self.chunk(*h)) {
                        Some(chunk) if cursor.offset() < chunk.bytes.len() => break,
                        Some(_) => cursor.enter(CursorPhase::Init { index: index + 1 }),
                        None => cursor.enter(CursorPhase::Waiting { after_seq: self.join_point() }),
                    }
                }
                CursorPhase::Events { handle, seq } => {
                    if self.chunk(handle).is_some_and(|c| cursor.offset() < c.bytes.len()) {
                        break;
                    }
                    self.unref(handle);
                    cursor.enter(CursorPhase::Waiting { after_seq: seq });
                }
                CursorPhase::Waiting { after_seq } => {
                    let Some((seq, handle)) = self.next_committed(after_seq) else {
                        break;
                    };
                    skipped += seq - after_seq - 1;
                    if let Some(chunk) = self.chunk_mut(handle) {
                        chunk.refcount += 1;
                    }
                    cursor.enter(CursorPhase::Events { handle, seq });
                }
            }
        }
        if skipped > 0 {
            debug!(skipped, "Cursor skipped reclaimed chunks");
            cursor.add_skipped(skipped);
        }
        skipped
    }

    /// Unread bytes of the cursor's current chunk.
    pub fn readable(&self, cursor: &ConsumerCursor) -> &[u8] {
        let chunk = match cursor.phase() {
            CursorPhase::Init { index } if self.setup_complete => self.init.get(index).and_then(|h| self.chunk(*h)),
            CursorPhase::Events { handle, .. } => self.chunk(handle),
            _ => None,
        };
        chunk.and_then(|c| c.bytes.get(cursor.offset()..)).unwrap_or(&[])
    }

    /// Drop the cursor's reference, leaving it waiting after its current chunk.
    pub fn detach(&mut self, cursor: &mut ConsumerCursor) {
        if let CursorPhase::Events { handle, seq } = cursor.phase() {
            self.unref(handle);
            cursor.enter(CursorPhase::Waiting { after_seq: seq });
        }
    }

    /// Whether the cursor has read everything committed and nothing is pending.
    pub fn is_drained(&self, cursor: &ConsumerCursor) -> bool {
        let pending = self.open_event.and_then(|h| self.chunk(h)).is_some_and(|c| !c.bytes.is_empty());
        match cursor.phase() {
            CursorPhase::Waiting { after_seq } => !pending && self.next_committed(after_seq).is_none(),
            _ => false,
        }
    }

    pub fn setup_complete(&self) -> bool {
        self.setup_complete
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn peak_in_use(&self) -> usize {
        self.peak
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn init_chunks(&self) -> usize {
        self.init.len()
    }

    pub fn committed_chunks(&self) -> usize {
        self.events.len()
    }

    /// Sequence number of the newest committed event chunk, 0 before the first.
    pub fn newest_seq(&self) -> u64 {
        self.next_seq - 1
    }

    pub fn chunks_allocated(&self) -> u64 {
        self.allocated
    }

    pub fn chunks_reclaimed(&self) -> u64 {
        self.reclaimed
    }

    /// References held on a committed event chunk, `None` once reclaimed.
    pub fn refcount(&self, seq: u64) -> Option<u32> {
        let (_, handle) = self.events.iter().find(|(s, _)| *s == seq)?;
        self.chunk(*handle).map(|c| c.refcount)
    }

    fn chunk(&self, handle: ChunkHandle) -> Option<&Chunk> {
        self.slots.get(handle.0).and_then(Option::as_ref)
    }

    fn chunk_mut(&mut self, handle: ChunkHandle) -> Option<&mut Chunk> {
        self.slots.get_mut(handle.0).and_then(Option::as_mut)
    }

    fn open(&self, class: ChunkClass) -> Option<ChunkHandle> {
        match class {
            ChunkClass::Init => self.open_init,
            ChunkClass::Event => self.open_event,
        }
    }

    fn open_mut(&mut self, class: ChunkClass) -> &mut Option<ChunkHandle> {
        match class {
            ChunkClass::Init => &mut self.open_init,
            ChunkClass::Event => &mut self.open_event,
        }
    }

    fn fits(&self, handle: ChunkHandle, len: usize) -> bool {
        self.chunk(handle).is_some_and(|c| c.bytes.len() + len <= c.reserved)
    }

    /// Close the open chunk of `class`: empty chunks are freed, others shrink to
    /// their contents and join the init list or the committed event queue.
    fn seal(&mut self, class: ChunkClass) {
        let Some(handle) = self.open_mut(class).take() else {
            return;
        };
        let seq = self.next_seq;
        let Some(chunk) = self.chunk_mut(handle) else {
            return;
        };
        if chunk.bytes.is_empty() {
            self.release(handle);
            return;
        }

        chunk.bytes.shrink_to_fit();
        let freed = chunk.reserved - chunk.bytes.len();
        chunk.reserved = chunk.bytes.len();
        let len = chunk.bytes.len();
        self.in_use -= freed;

        match class {
            ChunkClass::Init => self.init.push(handle),
            ChunkClass::Event => {
                self.events.push_back((seq, handle));
                self.next_seq += 1;
            }
        }
        trace!(?class, seq, len, "Committed chunk");
    }

    fn allocate(&mut self, len: usize) -> Result<ChunkHandle, CapacityError> {
        let reserved = self.chunk_size.max(len).min(self.ceiling);
        self.reclaim(reserved)?;

        let chunk = Chunk { bytes: Vec::with_capacity(reserved), reserved, refcount: 0 };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(chunk);
                index
            }
            None => {
                self.slots.push(Some(chunk));
                self.slots.len() - 1
            }
        };
        self.in_use += reserved;
        self.peak = self.peak.max(self.in_use);
        self.allocated += 1;
        Ok(ChunkHandle(index))
    }

    /// Free unreferenced event chunks, oldest first, until `needed` more bytes fit.
    fn reclaim(&mut self, needed: usize) -> Result<(), CapacityError> {
        while self.in_use + needed > self.ceiling {
            let victim = self
                .events
                .iter()
                .position(|(_, h)| self.chunk(*h).is_some_and(|c| c.refcount == 0));
            let Some((seq, handle)) = victim.and_then(|i| self.events.remove(i)) else {
                return Err(CapacityError::CeilingExceeded {
                    ceiling: self.ceiling,
                    in_use: self.in_use,
                    requested: needed,
                });
            };
            self.release(handle);
            self.reclaimed += 1;
            trace!(seq, in_use = self.in_use, "Reclaimed chunk");
        }
        Ok(())
    }

    fn release(&mut self, handle: ChunkHandle) {
        if let Some(chunk) = self.slots.get_mut(handle.0).and_then(Option::take) {
            self.in_use -= chunk.reserved;
            self.free.push(handle.0);
        }
    }

    fn unref(&mut self, handle: ChunkHandle) {
        if let Some(chunk) = self.chunk_mut(handle) {
            chunk.refcount = chunk.refcount.saturating_sub(1);
        }
    }

    fn next_committed(&self, after_seq: u64) -> Option<(u64, ChunkHandle)> {
        let index = self.events.partition_point(|(seq, _)| *seq <= after_seq);
        self.events.get(index).copied()
    }

    /// Where a consumer that finished the init chunks starts: just before the newest
    /// committed event chunk, or before the next one when none is committed.
    fn join_point(&self) -> u64 {
        self.events.back().map_or(self.next_seq, |(seq, _)| *seq) - 1
    }
}
