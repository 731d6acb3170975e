//! Bounded typed packet FIFO with drop-on-overflow and shutdown signaling.
//!
//! Producers never block: a full queue drops the incoming packet and bumps
//! the drop counter. Consumers may poll or wait with a timeout. After
//! `shutdown()` every enqueue fails fast and any waiting consumer wakes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::buffer::pool::{BufferPool, PooledBuf};
use crate::protocol::PacketType;

/// Outcome of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    Queued,
    /// Queue at capacity; the incoming packet was dropped.
    Full,
    /// Queue is shut down; the incoming packet was dropped.
    Shutdown,
}

/// One queued packet. The payload stays valid until the packet is dropped,
/// which releases it back to the pool.
#[derive(Debug)]
pub struct QueuedPacket {
    pub packet_type: PacketType,
    pub sender_id: u32,
    pub payload: PooledBuf,
}

/// Queue counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped: u64,
}

struct Inner {
    packets: VecDeque<QueuedPacket>,
    shutdown: bool,
    stats: QueueStats,
}

/// Bounded FIFO of typed packets.
pub struct PacketQueue {
    inner: Mutex<Inner>,
    available: Condvar,
    pool: Arc<BufferPool>,
    max_entries: usize,
}

impl PacketQueue {
    /// `max_entries` bounds the queue; `prealloc` sizes the initial node
    /// storage (clamped to the bound).
    pub fn new(pool: Arc<BufferPool>, max_entries: usize, prealloc: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                packets: VecDeque::with_capacity(prealloc.min(max_entries)),
                shutdown: false,
                stats: QueueStats::default(),
            }),
            available: Condvar::new(),
            pool,
            max_entries,
        })
    }

    /// Enqueue a packet, copying the payload into a pool buffer owned by
    /// the queue.
    pub fn enqueue_copy(
        &self,
        packet_type: PacketType,
        payload: &[u8],
        sender_id: u32,
    ) -> EnqueueResult {
        let mut buf = self.pool.acquire(payload.len());
        buf.copy_from_slice(payload);
        self.enqueue(packet_type, buf, sender_id)
    }

    /// Enqueue a packet, transferring ownership of an existing pool buffer.
    pub fn enqueue(
        &self,
        packet_type: PacketType,
        payload: PooledBuf,
        sender_id: u32,
    ) -> EnqueueResult {
        let mut inner = self.inner.lock();
        if inner.shutdown {
            inner.stats.dropped += 1;
            return EnqueueResult::Shutdown;
        }
        if inner.packets.len() >= self.max_entries {
            inner.stats.dropped += 1;
            return EnqueueResult::Full;
        }
        inner.packets.push_back(QueuedPacket {
            packet_type,
            sender_id,
            payload,
        });
        inner.stats.enqueued += 1;
        drop(inner);
        self.available.notify_one();
        EnqueueResult::Queued
    }

    /// Non-blocking dequeue.
    pub fn try_dequeue(&self) -> Option<QueuedPacket> {
        let mut inner = self.inner.lock();
        let packet = inner.packets.pop_front();
        if packet.is_some() {
            inner.stats.dequeued += 1;
        }
        packet
    }

    /// Dequeue, waiting up to `timeout` for a packet or shutdown.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<QueuedPacket> {
        let mut inner = self.inner.lock();
        if inner.packets.is_empty() && !inner.shutdown {
            self.available.wait_for(&mut inner, timeout);
        }
        let packet = inner.packets.pop_front();
        if packet.is_some() {
            inner.stats.dequeued += 1;
        }
        packet
    }

    /// Fail future enqueues, drop queued packets back to the pool, and wake
    /// any waiting consumer.
    pub fn shutdown(&self) {
        let drained: Vec<QueuedPacket> = {
            let mut inner = self.inner.lock();
            inner.shutdown = true;
            inner.packets.drain(..).collect()
        };
        drop(drained);
        self.available.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.lock().shutdown
    }

    pub fn len(&self) -> usize {
        self.inner.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.lock().stats
    }
}
