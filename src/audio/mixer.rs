//! Mix-excluding audio fan-out.
//!
//! Every connected client's audio ring registers here; each client's audio
//! render thread asks for a mix that excludes its own source, so nobody
//! hears themselves. Sources that run short contribute silence for the
//! remainder of the batch.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::buffer::audio_ring::AudioRing;

/// Registry of per-client audio sources.
pub struct AudioMixer {
    sources: RwLock<HashMap<u32, Arc<AudioRing>>>,
}

impl AudioMixer {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Register a source. Re-registering an id replaces its ring.
    pub fn add_source(&self, source_id: u32, ring: Arc<AudioRing>) {
        self.sources.write().insert(source_id, ring);
    }

    pub fn remove_source(&self, source_id: u32) {
        self.sources.write().remove(&source_id);
    }

    pub fn source_count(&self) -> usize {
        self.sources.read().len()
    }

    /// Sum every registered source except `exclude` into `out`, then apply
    /// the ducking limiter: samples whose magnitude exceeds 1.0 are scaled
    /// by `1/|sum|`. Returns `out.len()`.
    pub fn process_excluding(&self, out: &mut [f32], exclude: u32) -> usize {
        out.fill(0.0);
        let sources: Vec<Arc<AudioRing>> = {
            let map = self.sources.read();
            map.iter()
                .filter(|(id, _)| **id != exclude)
                .map(|(_, ring)| ring.clone())
                .collect()
        };
        for ring in sources {
            ring.read_add(out);
        }
        for sample in out.iter_mut() {
            let magnitude = sample.abs();
            if magnitude > 1.0 {
                *sample /= magnitude;
            }
        }
        out.len()
    }
}

impl Default for AudioMixer {
    fn default() -> Self {
        Self::new()
    }
}
