//! Per-client state: the record bundle, the global registry, the four
//! session threads.

pub mod manager;
pub mod threads;

use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::Mutex;

use crate::buffer::audio_ring::AudioRing;
use crate::buffer::frame_ring::FrameRing;
use crate::buffer::packet_queue::PacketQueue;
use crate::buffer::pool::BufferPool;
use crate::protocol::caps::{ClientFlags, TerminalCaps};
use crate::render::palette::PaletteLut;
use crate::render::{ColorLevel, RenderMode};
use crate::video::frame::VideoFrame;

/// Upper bound on concurrently connected clients.
pub const MAX_CLIENTS: usize = 32;

/// Video ring depth per client (frames).
pub const VIDEO_RING_CAPACITY: usize = 16;

/// Audio ring depth per client: one second of mono samples at the mix rate.
pub const AUDIO_RING_CAPACITY: usize = 48_000;

/// Outgoing queue depths. Audio is small and drains fast; video frames are
/// large and replaceable.
pub const AUDIO_QUEUE_DEPTH: usize = 64;
pub const VIDEO_QUEUE_DEPTH: usize = 16;

/// Capability/palette state guarded by the record's state mutex.
#[derive(Debug)]
pub struct ClientState {
    pub display_name: String,
    pub flags: ClientFlags,
    pub term: TerminalCaps,
    pub palette: PaletteLut,
    /// Sender count at the last rendered mosaic; a change triggers a
    /// CLEAR_CONSOLE so stale cells don't linger on the client.
    pub last_sender_count: usize,
}

/// Immutable-per-tick snapshot the video render thread works from, taken
/// under the state mutex and released before any pixel work.
#[derive(Debug, Clone)]
pub struct CapsSnapshot {
    pub color_level: ColorLevel,
    pub render_mode: RenderMode,
    pub utf8: bool,
    pub width: u16,
    pub height: u16,
    pub palette: PaletteLut,
}

impl CapsSnapshot {
    /// The mode actually rendered: half-block needs both UTF-8 and color,
    /// otherwise the client gets plain foreground cells.
    pub fn effective_mode(&self) -> RenderMode {
        if self.render_mode == RenderMode::HalfBlock
            && (!self.utf8 || self.color_level == ColorLevel::Mono)
        {
            RenderMode::Foreground
        } else {
            self.render_mode
        }
    }
}

struct ThreadHandles {
    receive: Option<JoinHandle<()>>,
    send: Option<JoinHandle<()>>,
    video_render: Option<JoinHandle<()>>,
    audio_render: Option<JoinHandle<()>>,
}

/// One connected client: identity, negotiated capabilities, media buffers,
/// outbound queues and session threads.
pub struct ClientRecord {
    /// Monotonically assigned, non-zero, never reused.
    pub client_id: u32,
    pub peer_addr: SocketAddr,
    pub port: u16,
    pub connected_at: Instant,

    /// Peer stream handle kept for shutdown; the receive and send threads
    /// own their own clones.
    stream: TcpStream,

    /// Peer liveness. Cleared by the receive thread on EOF/error and by
    /// teardown; the reaper frees records whose flag is down.
    pub active: AtomicBool,
    /// Run gate for all four session threads.
    pub running: AtomicBool,

    pub is_sending_video: AtomicBool,
    pub is_sending_audio: AtomicBool,

    pub state: Mutex<ClientState>,
    /// Last validated decoded frame, used when the ring is empty.
    pub cached_frame: Mutex<Option<VideoFrame>>,

    pub video_ring: FrameRing,
    pub audio_ring: Arc<AudioRing>,
    pub audio_queue: Arc<PacketQueue>,
    pub video_queue: Arc<PacketQueue>,

    pub frames_received: AtomicU64,
    pub frames_sent: AtomicU64,
    pub renders_skipped: AtomicU64,
    pub unknown_packets: AtomicU64,

    threads: Mutex<ThreadHandles>,
}

impl ClientRecord {
    /// Build a record with all owned subresources. The record is not yet
    /// published anywhere; the manager does that after this returns.
    pub(crate) fn new(
        client_id: u32,
        stream: TcpStream,
        peer_addr: SocketAddr,
        pool: &Arc<BufferPool>,
    ) -> Self {
        Self {
            client_id,
            peer_addr,
            port: peer_addr.port(),
            connected_at: Instant::now(),
            stream,
            active: AtomicBool::new(true),
            running: AtomicBool::new(true),
            is_sending_video: AtomicBool::new(false),
            is_sending_audio: AtomicBool::new(false),
            state: Mutex::new(ClientState {
                display_name: String::new(),
                flags: ClientFlags::default(),
                term: TerminalCaps::default(),
                palette: PaletteLut::empty(),
                last_sender_count: 0,
            }),
            cached_frame: Mutex::new(None),
            video_ring: FrameRing::new(VIDEO_RING_CAPACITY),
            audio_ring: Arc::new(AudioRing::new(AUDIO_RING_CAPACITY)),
            audio_queue: PacketQueue::new(pool.clone(), AUDIO_QUEUE_DEPTH, AUDIO_QUEUE_DEPTH),
            video_queue: PacketQueue::new(pool.clone(), VIDEO_QUEUE_DEPTH, VIDEO_QUEUE_DEPTH),
            frames_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            renders_skipped: AtomicU64::new(0),
            unknown_packets: AtomicU64::new(0),
            threads: Mutex::new(ThreadHandles {
                receive: None,
                send: None,
                video_render: None,
                audio_render: None,
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clone the peer stream for a thread that owns one direction.
    pub fn clone_stream(&self) -> io::Result<TcpStream> {
        self.stream.try_clone()
    }

    /// Shut both directions down, unblocking any thread stuck in socket
    /// I/O. Safe to call more than once.
    pub fn shutdown_socket(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    /// Snapshot the capability fields the video renderer needs.
    pub fn caps_snapshot(&self) -> CapsSnapshot {
        let state = self.state.lock();
        CapsSnapshot {
            color_level: state.term.color_level,
            render_mode: state.term.render_mode,
            utf8: state.term.utf8,
            width: state.term.width,
            height: state.term.height,
            palette: state.palette.clone(),
        }
    }

    pub(crate) fn store_threads(
        &self,
        receive: JoinHandle<()>,
        send: JoinHandle<()>,
        video_render: JoinHandle<()>,
        audio_render: JoinHandle<()>,
    ) {
        let mut threads = self.threads.lock();
        threads.receive = Some(receive);
        threads.send = Some(send);
        threads.video_render = Some(video_render);
        threads.audio_render = Some(audio_render);
    }

    /// Join the session threads in teardown order: receive, send, video
    /// render, audio render. Callers must have cleared `running`, shut the
    /// socket and shut both queues first.
    pub(crate) fn join_threads(&self) {
        let handles = {
            let mut threads = self.threads.lock();
            [
                threads.receive.take(),
                threads.send.take(),
                threads.video_render.take(),
                threads.audio_render.take(),
            ]
        };
        for handle in handles.into_iter().flatten() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for ClientRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRecord")
            .field("client_id", &self.client_id)
            .field("peer_addr", &self.peer_addr)
            .field("active", &self.is_active())
            .finish()
    }
}
