//! Shared buffering primitives: payload pool, packet queues, media rings.

pub mod audio_ring;
pub mod frame_ring;
pub mod packet_queue;
pub mod pool;
