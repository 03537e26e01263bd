//! Server statistics and the cross-thread monitor board.

use std::hint;
use std::sync::atomic::{AtomicU64, Ordering, fence};

use serde::Serialize;

/// Counters maintained by the broadcast loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub messages_published: u64,
    pub bytes_published: u64,
    pub chunks_allocated: u64,
    pub chunks_reclaimed: u64,
    /// Chunks consumers missed because they were reclaimed first.
    pub chunks_skipped: u64,
    pub consumers_accepted: u64,
    /// Connections refused or dropped before streaming: bad magic, timeout, limit.
    pub consumers_rejected: u64,
    pub consumers_active: u64,
    pub bytes_sent: u64,
    pub bytes_in_use: u64,
    pub peak_bytes_in_use: u64,
}

const STAT_FIELDS: usize = 11;

impl ServerStats {
    fn to_array(self) -> [u64; STAT_FIELDS] {
        [
            self.messages_published,
            self.bytes_published,
            self.chunks_allocated,
            self.chunks_reclaimed,
            self.chunks_skipped,
            self.consumers_accepted,
            self.consumers_rejected,
            self.consumers_active,
            self.bytes_sent,
            self.bytes_in_use,
            self.peak_bytes_in_use,
        ]
    }

    fn from_array(values: [u64; STAT_FIELDS]) -> Self {
        let [
            messages_published,
            bytes_published,
            chunks_allocated,
            chunks_reclaimed,
            chunks_skipped,
            consumers_accepted,
            consumers_rejected,
            consumers_active,
            bytes_sent,
            bytes_in_use,
            peak_bytes_in_use,
        ] = values;
        Self {
            messages_published,
            bytes_published,
            chunks_allocated,
            chunks_reclaimed,
            chunks_skipped,
            consumers_accepted,
            consumers_rejected,
            consumers_active,
            bytes_sent,
            bytes_in_use,
            peak_bytes_in_use,
        }
    }
}

/// Double-buffered snapshot of [`ServerStats`] readable from any thread.
///
/// The single writer bumps the generation to odd, fills the inactive slot and
/// bumps it to even, which makes that slot active. Readers copy the active slot
/// and retry if the generation moved while they copied.
#[derive(Debug, Default)]
pub struct StatsBoard {
    generation: AtomicU64,
    slots: [[AtomicU64; STAT_FIELDS]; 2],
}

impl StatsBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new snapshot. Only the server thread calls this.
    pub fn publish(&self, stats: &ServerStats) {
        let generation = self.generation.load(Ordering::Relaxed);
        self.generation.store(generation + 1, Ordering::Relaxed);
        fence(Ordering::Release);

        let slot = &self.slots[Self::slot_index(generation + 2)];
        for (cell, value) in slot.iter().zip(stats.to_array()) {
            cell.store(value, Ordering::Relaxed);
        }
        self.generation.store(generation + 2, Ordering::Release);
    }

    /// Latest consistent snapshot.
    pub fn snapshot(&self) -> ServerStats {
        loop {
            let before = self.generation.load(Ordering::Acquire);
            let slot = &self.slots[Self::slot_index(before)];
            let mut values = [0u64; STAT_FIELDS];
            for (value, cell) in values.iter_mut().zip(slot) {
                *value = cell.load(Ordering::Relaxed);
            }
            fence(Ordering::Acquire);
            if self.generation.load(Ordering::Relaxed) == before {
                return ServerStats::from_array(values);
            }
            hint::spin_loop();
        }
    }

    /// Number of completed publishes.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire) / 2
    }

    /// Slot made active by the publish that ends at `generation`.
    fn slot_index(generation: u64) -> usize {
        ((generation / 2) % 2) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn uniform(value: u64) -> ServerStats {
        ServerStats::from_array([value; STAT_FIELDS])
    }

    #[test]
    fn empty_board_reads_zero() {
        let board = StatsBoard::new();
        assert_eq!(board.snapshot(), ServerStats::default());
        assert_eq!(board.generation(), 0);
    }

    #[test]
    fn latest_publish_wins() {
        let board = StatsBoard::new();
        board.publish(&ServerStats { messages_published: 3, ..ServerStats::default() });
        board.publish(&ServerStats { messages_published: 7, bytes_sent: 70, ..ServerStats::default() });
        let snapshot = board.snapshot();
        assert_eq!(snapshot.messages_published, 7);
        assert_eq!(snapshot.bytes_sent, 70);
        assert_eq!(board.generation(), 2);
    }

    #[test]
    fn readers_never_see_torn_snapshots() {
        let board = Arc::new(StatsBoard::new());
        let writer = {
            let board = Arc::clone(&board);
            thread::spawn(move || {
                for i in 1..=20_000 {
                    board.publish(&uniform(i));
                }
            })
        };
        let readers: Vec<_> = (0..3)
            .map(|_| {
                let board = Arc::clone(&board);
                thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..20_000 {
                        let values = board.snapshot().to_array();
                        assert!(values.iter().all(|v| *v == values[0]), "torn snapshot {:?}", values);
                        assert!(values[0] >= last);
                        last = values[0];
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(board.snapshot(), uniform(20_000));
    }
}
