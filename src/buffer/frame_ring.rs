//! Multi-frame video ring with a drain-to-latest read policy.
//!
//! Single producer (the owning client's receive thread), single consumer
//! (any render thread compositing this source). The ring exists to absorb
//! network jitter, not to add steady-state latency: when occupancy climbs
//! past the drain threshold the reader discards everything but the newest
//! frame, releasing skipped payloads back to the pool.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::buffer::pool::PooledBuf;

/// Frame record magic, validated on read.
pub const FRAME_MAGIC: u32 = 0x4652_4D45; // "FRME"

/// Occupancy ratio above which the reader drains: occupancy/capacity > 0.3.
const DRAIN_NUMERATOR: usize = 3;
const DRAIN_DENOMINATOR: usize = 10;

/// Upper bound on frames skipped in one drain pass.
const MAX_DRAIN_FRAMES: usize = 20;

/// One buffered video frame in wire format (`width ‖ height ‖ RGB`).
#[derive(Debug)]
pub struct FrameRecord {
    pub magic: u32,
    pub source_id: u32,
    pub sequence: u64,
    pub timestamp_us: u64,
    pub data: PooledBuf,
}

/// Ring counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub written: u64,
    /// Oldest frames displaced by writes into a full ring.
    pub overwritten: u64,
    /// Frames discarded by drain-to-latest reads.
    pub skipped: u64,
    pub read: u64,
}

struct Inner {
    frames: VecDeque<FrameRecord>,
    next_sequence: u64,
    stats: RingStats,
}

/// SPSC video frame ring. All access goes through the internal mutex, so
/// the render thread may safely read while the receive thread writes.
pub struct FrameRing {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl FrameRing {
    /// `capacity` is rounded up to the next power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                next_sequence: 0,
                stats: RingStats::default(),
            }),
            capacity,
        }
    }

    /// Append a frame. A full ring displaces its oldest frame; latest wins
    /// on the write side as well as the read side.
    pub fn write_frame(&self, source_id: u32, timestamp_us: u64, data: PooledBuf) {
        let mut inner = self.inner.lock();
        if inner.frames.len() >= self.capacity {
            inner.frames.pop_front();
            inner.stats.overwritten += 1;
        }
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.frames.push_back(FrameRecord {
            magic: FRAME_MAGIC,
            source_id,
            sequence,
            timestamp_us,
            data,
        });
        inner.stats.written += 1;
    }

    /// Read one frame, applying the drain-to-latest policy: when occupancy
    /// exceeds the threshold, up to `min(occupancy - 1, 20)` older frames
    /// are discarded (payloads released to the pool) before the read.
    pub fn read_latest(&self) -> Option<FrameRecord> {
        let mut inner = self.inner.lock();
        let occupancy = inner.frames.len();
        if occupancy == 0 {
            return None;
        }
        if occupancy * DRAIN_DENOMINATOR > self.capacity * DRAIN_NUMERATOR {
            let skip = (occupancy - 1).min(MAX_DRAIN_FRAMES);
            for _ in 0..skip {
                inner.frames.pop_front();
            }
            inner.stats.skipped += skip as u64;
        }
        let record = inner.frames.pop_front();
        if let Some(ref r) = record {
            debug_assert_eq!(r.magic, FRAME_MAGIC);
            inner.stats.read += 1;
        }
        record
    }

    pub fn occupancy(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> RingStats {
        self.inner.lock().stats
    }

    /// Drop all buffered frames, releasing payloads to the pool.
    pub fn clear(&self) {
        self.inner.lock().frames.clear();
    }
}
