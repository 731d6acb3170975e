//! Process-wide payload buffer pool.
//!
//! Packet payloads churn at frame rate on every connection, so buffers are
//! recycled through size classes instead of hitting the allocator per
//! packet. Requests above the largest class fall through to plain heap
//! vectors and are counted. Accounting is strict: the pool's in-use count
//! must be zero once every queue and ring has been torn down.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Size classes (bytes) and how many free buffers each class retains.
const CLASSES: [(usize, usize); 4] = [
    (4 * 1024, 64),
    (64 * 1024, 32),
    (1024 * 1024, 16),
    (16 * 1024 * 1024, 4),
];

/// Pool statistics snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub acquired: u64,
    pub released: u64,
    pub in_use: u64,
    pub hits: u64,
    pub misses: u64,
    pub oversize: u64,
    pub free_buffers: u64,
}

struct PoolClass {
    size: usize,
    max_free: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

/// Size-classed buffer pool. Cheap to share; all methods take `&self`.
pub struct BufferPool {
    classes: Vec<PoolClass>,
    acquired: AtomicU64,
    released: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    oversize: AtomicU64,
}

impl BufferPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            classes: CLASSES
                .iter()
                .map(|&(size, max_free)| PoolClass {
                    size,
                    max_free,
                    free: Mutex::new(Vec::new()),
                })
                .collect(),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            oversize: AtomicU64::new(0),
        })
    }

    /// Acquire a buffer of exactly `len` bytes, zero-filled.
    pub fn acquire(self: &Arc<Self>, len: usize) -> PooledBuf {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        let class = self.classes.iter().position(|c| len <= c.size);
        let mut data = match class {
            Some(idx) => {
                let recycled = self.classes[idx].free.lock().pop();
                match recycled {
                    Some(vec) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        vec
                    }
                    None => {
                        self.misses.fetch_add(1, Ordering::Relaxed);
                        Vec::with_capacity(self.classes[idx].size)
                    }
                }
            }
            None => {
                self.oversize.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(len)
            }
        };
        data.clear();
        data.resize(len, 0);
        PooledBuf {
            pool: self.clone(),
            class,
            data,
        }
    }

    /// Wrap an already-built vector so it participates in pool accounting.
    /// The vector is heap-owned (no size class) and freed on release.
    pub fn adopt(self: &Arc<Self>, data: Vec<u8>) -> PooledBuf {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        self.oversize.fetch_add(1, Ordering::Relaxed);
        PooledBuf {
            pool: self.clone(),
            class: None,
            data,
        }
    }

    fn release(&self, class: Option<usize>, data: Vec<u8>) {
        self.released.fetch_add(1, Ordering::Relaxed);
        if let Some(idx) = class {
            let c = &self.classes[idx];
            let mut free = c.free.lock();
            if free.len() < c.max_free {
                free.push(data);
            }
        }
    }

    /// Buffers currently held by callers.
    pub fn in_use(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed) - self.released.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PoolStats {
        let acquired = self.acquired.load(Ordering::Relaxed);
        let released = self.released.load(Ordering::Relaxed);
        PoolStats {
            acquired,
            released,
            in_use: acquired - released,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            oversize: self.oversize.load(Ordering::Relaxed),
            free_buffers: self
                .classes
                .iter()
                .map(|c| c.free.lock().len() as u64)
                .sum(),
        }
    }

    /// Drop all retained free buffers. Call only after every queue and ring
    /// holding pool buffers has been destroyed.
    pub fn flush(&self) {
        for class in &self.classes {
            class.free.lock().clear();
        }
    }
}

/// A pooled byte buffer. Dereferences to its byte slice; returning it to
/// the pool is just dropping it.
pub struct PooledBuf {
    pool: Arc<BufferPool>,
    class: Option<usize>,
    data: Vec<u8>,
}

impl PooledBuf {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.data.len())
            .field("class", &self.class)
            .finish()
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.pool.release(self.class, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_accounting() {
        let pool = BufferPool::new();
        {
            let a = pool.acquire(100);
            let b = pool.acquire(100_000);
            assert_eq!(a.len(), 100);
            assert_eq!(b.len(), 100_000);
            assert_eq!(pool.in_use(), 2);
        }
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_buffers_are_recycled() {
        let pool = BufferPool::new();
        drop(pool.acquire(512));
        let stats = pool.stats();
        assert_eq!(stats.free_buffers, 1);
        drop(pool.acquire(512));
        assert_eq!(pool.stats().hits, 1);
    }

    #[test]
    fn test_recycled_buffer_is_zeroed() {
        let pool = BufferPool::new();
        {
            let mut buf = pool.acquire(16);
            buf[0] = 0xAA;
        }
        let buf = pool.acquire(16);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_oversize_falls_through() {
        let pool = BufferPool::new();
        let big = pool.acquire(64 * 1024 * 1024);
        assert_eq!(big.len(), 64 * 1024 * 1024);
        assert_eq!(pool.stats().oversize, 1);
        drop(big);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.stats().free_buffers, 0);
    }

    #[test]
    fn test_adopt_balances() {
        let pool = BufferPool::new();
        let buf = pool.adopt(vec![1, 2, 3]);
        assert_eq!(&buf[..], &[1, 2, 3]);
        assert_eq!(pool.in_use(), 1);
        drop(buf);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_flush_clears_free_lists() {
        let pool = BufferPool::new();
        drop(pool.acquire(512));
        assert_eq!(pool.stats().free_buffers, 1);
        pool.flush();
        assert_eq!(pool.stats().free_buffers, 0);
    }
}
