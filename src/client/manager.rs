//! Global client registry: fixed slots, O(1) id lookup, monotonic ids.
//!
//! Readers (compositor fan-out, stats) iterate the slot array under the
//! read lock; writers allocate and free slots. Teardown joins the session
//! threads *outside* the write lock so render threads of other clients can
//! keep taking read snapshots while a removal is in flight.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::audio::mixer::AudioMixer;
use crate::buffer::pool::BufferPool;

use super::{ClientRecord, MAX_CLIENTS};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddClientError {
    #[error("server full ({0} clients)")]
    ServerFull(usize),
}

struct Registry {
    slots: Vec<Option<Arc<ClientRecord>>>,
    by_id: HashMap<u32, usize>,
}

/// Fixed-capacity client table plus id map, both under one RW lock.
pub struct ClientManager {
    registry: RwLock<Registry>,
    next_id: AtomicU32,
    capacity: usize,
}

impl ClientManager {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_CLIENTS);
        Self {
            registry: RwLock::new(Registry {
                slots: (0..capacity).map(|_| None).collect(),
                by_id: HashMap::with_capacity(capacity),
            }),
            next_id: AtomicU32::new(1),
            capacity,
        }
    }

    /// Allocate the lowest free slot, assign the next monotonic id, build
    /// the record with its subresources and register its audio source.
    /// The write lock is released before the caller spawns any threads.
    pub fn add_client(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        pool: &Arc<BufferPool>,
        mixer: &AudioMixer,
    ) -> Result<Arc<ClientRecord>, AddClientError> {
        let mut registry = self.registry.write();
        let slot = match registry.slots.iter().position(Option::is_none) {
            Some(slot) => slot,
            None => return Err(AddClientError::ServerFull(self.capacity)),
        };
        let client_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = Arc::new(ClientRecord::new(client_id, stream, peer_addr, pool));
        mixer.add_source(client_id, record.audio_ring.clone());
        registry.slots[slot] = Some(record.clone());
        registry.by_id.insert(client_id, slot);
        Ok(record)
    }

    /// Tear a client down: stop and unblock its threads, join them, then
    /// free the slot. The slot is not reusable until this whole sequence
    /// completes. Returns false for unknown ids.
    pub fn remove_client(&self, client_id: u32, mixer: &AudioMixer) -> bool {
        let record = match self.find_by_id(client_id) {
            Some(record) => record,
            None => return false,
        };

        // Stop and unblock. The socket shutdown frees a receive thread
        // stuck in a blocking read; the queue shutdowns wake the sender.
        record.running.store(false, Ordering::SeqCst);
        record.active.store(false, Ordering::SeqCst);
        record.shutdown_socket();
        record.audio_queue.shutdown();
        record.video_queue.shutdown();

        // Join outside any manager lock: render threads of live clients
        // must stay free to take read snapshots meanwhile.
        record.join_threads();

        mixer.remove_source(client_id);
        record.video_ring.clear();
        *record.cached_frame.lock() = None;

        let mut registry = self.registry.write();
        if let Some(slot) = registry.by_id.remove(&client_id) {
            registry.slots[slot] = None;
        }
        true
    }

    /// O(1) lookup through the id map. Debug builds cross-check against a
    /// linear slot scan.
    pub fn find_by_id(&self, client_id: u32) -> Option<Arc<ClientRecord>> {
        let registry = self.registry.read();
        let slot = registry.by_id.get(&client_id).copied()?;
        debug_assert_eq!(
            Some(slot),
            registry.slots.iter().position(|entry| {
                entry
                    .as_ref()
                    .is_some_and(|record| record.client_id == client_id)
            }),
            "id map out of sync with slot array"
        );
        registry.slots[slot].clone()
    }

    /// Snapshot every registered record for fan-out enumeration.
    pub fn snapshot(&self) -> Vec<Arc<ClientRecord>> {
        self.registry
            .read()
            .slots
            .iter()
            .filter_map(|slot| slot.clone())
            .collect()
    }

    /// Ids of records whose receive thread has observed EOF or a fatal
    /// error; the accept loop reaps these between accepts.
    pub fn inactive_ids(&self) -> Vec<u32> {
        self.registry
            .read()
            .slots
            .iter()
            .filter_map(|slot| slot.as_ref())
            .filter(|record| !record.is_active())
            .map(|record| record.client_id)
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.registry.read().by_id.len()
    }

    pub fn active_count(&self) -> usize {
        self.registry
            .read()
            .slots
            .iter()
            .filter_map(|slot| slot.as_ref())
            .filter(|record| record.is_active())
            .count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
