//! SPSC float PCM ring with overwrite-oldest writes.
//!
//! Backed by an unsplit `ringbuf` heap ring behind the record's mutex:
//! overwrite-oldest needs write-side access to the read cursor, and both
//! ends are already serialized by the locking discipline (receive thread
//! writes, mixer reads).

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

/// Counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioRingStats {
    pub samples_written: u64,
    pub samples_read: u64,
}

/// Bounded mono f32 sample ring. Writes always succeed; a full ring
/// advances the read cursor to make room.
pub struct AudioRing {
    rb: Mutex<HeapRb<f32>>,
    capacity: usize,
    samples_written: AtomicU64,
    samples_read: AtomicU64,
}

impl AudioRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            rb: Mutex::new(HeapRb::new(capacity)),
            capacity,
            samples_written: AtomicU64::new(0),
            samples_read: AtomicU64::new(0),
        }
    }

    /// Append samples, overwriting the oldest when full.
    pub fn write(&self, samples: &[f32]) {
        let mut rb = self.rb.lock();
        rb.push_slice_overwrite(samples);
        self.samples_written
            .fetch_add(samples.len() as u64, Ordering::Relaxed);
    }

    /// Pop up to `out.len()` samples into `out`, returning the count.
    pub fn read(&self, out: &mut [f32]) -> usize {
        let mut rb = self.rb.lock();
        let n = rb.pop_slice(out);
        self.samples_read.fetch_add(n as u64, Ordering::Relaxed);
        n
    }

    /// Pop up to `out.len()` samples and *add* them into `out` (mix
    /// accumulation), returning the count consumed.
    pub fn read_add(&self, out: &mut [f32]) -> usize {
        let mut rb = self.rb.lock();
        let mut chunk = [0.0f32; 256];
        let mut total = 0usize;
        while total < out.len() {
            let want = (out.len() - total).min(chunk.len());
            let got = rb.pop_slice(&mut chunk[..want]);
            if got == 0 {
                break;
            }
            for (dst, src) in out[total..total + got].iter_mut().zip(&chunk[..got]) {
                *dst += *src;
            }
            total += got;
        }
        self.samples_read.fetch_add(total as u64, Ordering::Relaxed);
        total
    }

    /// Samples currently buffered.
    pub fn occupancy(&self) -> usize {
        self.rb.lock().occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> AudioRingStats {
        AudioRingStats {
            samples_written: self.samples_written.load(Ordering::Relaxed),
            samples_read: self.samples_read.load(Ordering::Relaxed),
        }
    }
}
