//! Server lifecycle: context wiring, accept loop, reaper, stats timer,
//! graceful shutdown.
//!
//! Construction order is pool, mixer, manager, listener; teardown runs in
//! reverse with the pool flushed last, after every queue and ring that
//! could still hold a pooled buffer is gone.

pub mod listener;

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::audio::mixer::AudioMixer;
use crate::buffer::pool::BufferPool;
use crate::client::manager::{AddClientError, ClientManager};
use crate::client::threads::spawn_client_threads;
use crate::client::MAX_CLIENTS;
use crate::error::InitError;
use crate::protocol::frames::ServerStateInfo;
use crate::protocol::PacketType;
use crate::render::palette::{PaletteLut, PaletteType};

/// Accept timeout; doubles as the reap scan interval.
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(1);

/// Period of the stats log line.
const STATS_PERIOD: Duration = Duration::from_secs(30);

/// Default listen port.
pub const DEFAULT_PORT: u16 = 27_224;

/// Process-wide shutdown flag plus the condition every sleeping thread
/// waits on. Signal handlers may only call [`ShutdownSignal::trigger`].
pub struct ShutdownSignal {
    flag: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Set the flag and wake every waiter.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep up to `timeout`, waking early on a broadcast. Returns whether
    /// shutdown is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_set() {
            return true;
        }
        let mut guard = self.lock.lock();
        if !self.is_set() {
            self.cond.wait_for(&mut guard, timeout);
        }
        self.is_set()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Runtime configuration consumed by the core (the binary builds this from
/// CLI options).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub port: u16,
    pub audio_enabled: bool,
    pub palette_type: PaletteType,
    pub palette_custom: Option<String>,
    pub max_clients: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            audio_enabled: true,
            palette_type: PaletteType::Standard,
            palette_custom: None,
            max_clients: MAX_CLIENTS,
        }
    }
}

impl RuntimeConfig {
    /// The glyph string clients fall back to when they request a custom
    /// palette without supplying one.
    pub fn palette_chars(&self) -> &str {
        self.palette_type.resolve(self.palette_custom.as_deref())
    }
}

/// Shared server state: the explicit process-wide values (pool, mixer,
/// registry, shutdown) with their init/teardown owned by [`Server`].
pub struct ServerContext {
    pub config: RuntimeConfig,
    pub pool: Arc<BufferPool>,
    pub mixer: AudioMixer,
    pub manager: ClientManager,
    pub shutdown: ShutdownSignal,
}

impl ServerContext {
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        let max_clients = config.max_clients;
        Arc::new(Self {
            config,
            pool: BufferPool::new(),
            mixer: AudioMixer::new(),
            manager: ClientManager::new(max_clients),
            shutdown: ShutdownSignal::new(),
        })
    }
}

/// The accept-loop owner. `bind` fails fast (nonzero process exit);
/// `run` blocks until shutdown and then tears everything down.
pub struct Server {
    ctx: Arc<ServerContext>,
    listener: TcpListener,
}

impl Server {
    /// Validate the palette, build the shared context (pool, mixer,
    /// registry) and bind the listener, in that order.
    pub fn bind(config: RuntimeConfig) -> Result<Self, InitError> {
        PaletteLut::build(config.palette_chars())?;
        let ctx = ServerContext::new(config);
        let port = ctx.config.port;
        let listener = listener::bind_listener(port).map_err(|source| InitError::Bind {
            port,
            source,
        })?;
        Ok(Self { ctx, listener })
    }

    pub fn context(&self) -> Arc<ServerContext> {
        self.ctx.clone()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Each timeout doubles as a reap pass; each accepted
    /// connection gets a record and four session threads. Returns after a
    /// shutdown trigger once every client is reaped and the pool flushed.
    pub fn run(&self) -> io::Result<()> {
        log::info!(
            "listening on port {} (max {} clients, audio {})",
            self.local_addr().map(|a| a.port()).unwrap_or(self.ctx.config.port),
            self.ctx.manager.capacity(),
            if self.ctx.config.audio_enabled { "on" } else { "off" },
        );
        let stats_thread = spawn_stats_thread(&self.ctx);

        while !self.ctx.shutdown.is_set() {
            match listener::accept_with_timeout(&self.listener, &self.ctx.shutdown, ACCEPT_TIMEOUT)
            {
                Ok(Some((stream, peer_addr))) => self.handle_connection(stream, peer_addr),
                Ok(None) => {}
                Err(e) => {
                    if self.ctx.shutdown.is_set() {
                        break;
                    }
                    log::error!("accept failed: {}", e);
                    self.ctx.shutdown.wait_timeout(Duration::from_millis(100));
                }
            }
            self.reap_inactive();
        }

        self.teardown(stats_thread);
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        if let Err(e) = listener::configure_client_stream(&stream) {
            log::warn!("{}: stream setup failed: {}", peer_addr, e);
            return;
        }
        let record = match self
            .ctx
            .manager
            .add_client(stream, peer_addr, &self.ctx.pool, &self.ctx.mixer)
        {
            Ok(record) => record,
            Err(AddClientError::ServerFull(capacity)) => {
                log::warn!("{}: rejected, server full ({})", peer_addr, capacity);
                return;
            }
        };
        if let Err(e) = spawn_client_threads(&self.ctx, &record) {
            log::error!(
                "client {}: thread spawn failed, rolling back: {}",
                record.client_id,
                e
            );
            self.ctx.manager.remove_client(record.client_id, &self.ctx.mixer);
            return;
        }
        log::info!("client {} connected from {}", record.client_id, peer_addr);
        broadcast_server_state(&self.ctx);
    }

    /// Remove every record whose receive thread has marked it inactive.
    fn reap_inactive(&self) {
        let mut removed = false;
        for client_id in self.ctx.manager.inactive_ids() {
            if self.ctx.manager.remove_client(client_id, &self.ctx.mixer) {
                log::info!("client {} reaped", client_id);
                removed = true;
            }
        }
        if removed {
            broadcast_server_state(&self.ctx);
        }
    }

    fn teardown(&self, stats_thread: JoinHandle<()>) {
        self.ctx.shutdown.trigger();
        log::info!("shutting down");

        // Unblock every receive thread first, then reap all slots.
        for record in self.ctx.manager.snapshot() {
            record.shutdown_socket();
        }
        for record in self.ctx.manager.snapshot() {
            self.ctx.manager.remove_client(record.client_id, &self.ctx.mixer);
        }
        let _ = stats_thread.join();

        // Pool goes last; nothing may hold a pooled buffer by now.
        self.ctx.pool.flush();
        let stats = self.ctx.pool.stats();
        if stats.in_use != 0 {
            log::error!("pool leak at shutdown: {} buffers in use", stats.in_use);
        } else {
            log::info!(
                "clean shutdown ({} buffers recycled, {} oversize)",
                stats.released,
                stats.oversize
            );
        }
    }
}

/// Push the current connection counts to every active client.
pub fn broadcast_server_state(ctx: &Arc<ServerContext>) {
    let payload = ServerStateInfo {
        connected: ctx.manager.client_count() as u32,
        active: ctx.manager.active_count() as u32,
    }
    .encode();
    for record in ctx.manager.snapshot() {
        if record.is_active() {
            record
                .video_queue
                .enqueue_copy(PacketType::ServerState, &payload, 0);
        }
    }
}

fn spawn_stats_thread(ctx: &Arc<ServerContext>) -> JoinHandle<()> {
    let ctx = ctx.clone();
    thread::spawn(move || {
        while !ctx.shutdown.wait_timeout(STATS_PERIOD) {
            log_stats(&ctx);
        }
    })
}

fn log_stats(ctx: &Arc<ServerContext>) {
    let pool = ctx.pool.stats();
    log::info!(
        "stats: {}/{} slots used, pool in_use={} free={} hit/miss={}/{}",
        ctx.manager.client_count(),
        ctx.manager.capacity(),
        pool.in_use,
        pool.free_buffers,
        pool.hits,
        pool.misses,
    );
    for record in ctx.manager.snapshot() {
        let audio = record.audio_queue.stats();
        let video = record.video_queue.stats();
        log::info!(
            "stats: client {} ({}) rx_frames={} tx_frames={} ring={}/{} aq={}/{}/{} vq={}/{}/{} skipped={}",
            record.client_id,
            record.peer_addr,
            record.frames_received.load(Ordering::Relaxed),
            record.frames_sent.load(Ordering::Relaxed),
            record.video_ring.occupancy(),
            record.video_ring.capacity(),
            audio.enqueued,
            audio.dequeued,
            audio.dropped,
            video.enqueued,
            video.dequeued,
            video.dropped,
            record.renders_skipped.load(Ordering::Relaxed),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::caps::{ClientFlags, JoinInfo, TerminalCaps};
    use crate::protocol::codec::{read_packet, write_packet, ReadOutcome};
    use crate::protocol::frames::encode_image_payload;
    use crate::protocol::{PacketType, STREAM_VIDEO};
    use crate::render::{ColorLevel, RenderMode};
    use std::io::Read;
    use std::time::Instant;

    fn test_config() -> RuntimeConfig {
        RuntimeConfig {
            port: 0,
            ..RuntimeConfig::default()
        }
    }

    /// Connect a client and complete the join/caps handshake.
    fn join_client(addr: SocketAddr, name: &str) -> TcpStream {
        let mut stream = TcpStream::connect(addr).unwrap();
        let join = JoinInfo {
            flags: ClientFlags {
                can_send_video: true,
                can_send_audio: true,
                wants_color: true,
                wants_stretch: false,
            },
            display_name: name.to_string(),
        };
        write_packet(&mut stream, PacketType::ClientJoin, 0, &join.encode()).unwrap();
        let caps = TerminalCaps {
            color_level: ColorLevel::TrueColor,
            render_mode: RenderMode::Foreground,
            utf8: true,
            width: 40,
            height: 12,
            ..TerminalCaps::default()
        };
        write_packet(&mut stream, PacketType::ClientCapabilities, 0, &caps.encode()).unwrap();
        write_packet(
            &mut stream,
            PacketType::StreamStart,
            0,
            &STREAM_VIDEO.to_be_bytes(),
        )
        .unwrap();
        stream
    }

    fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_connect_render_disconnect_reap() {
        let server = Server::bind(test_config()).unwrap();
        let addr = server.local_addr().unwrap();
        let ctx = server.context();
        let run = thread::spawn(move || server.run());

        let mut c1 = join_client(addr, "alice");
        let c2 = join_client(addr, "bob");
        assert!(wait_until(Duration::from_secs(5), || {
            ctx.manager.client_count() == 2
        }));

        // Alice streams a frame; both render threads should now produce
        // mosaics (one-cell grids containing alice).
        let frame = encode_image_payload(16, 12, &vec![128u8; 16 * 12 * 3]);
        write_packet(&mut c1, PacketType::ImageFrame, 0, &frame).unwrap();

        // Bob must receive an ASCII_FRAME eventually.
        c2.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let mut saw_frame = false;
        let mut c2_reader = c2.try_clone().unwrap();
        let pool = ctx.pool.clone();
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            match read_packet(&mut c2_reader, &pool) {
                Ok(ReadOutcome::Packet(p)) if p.wire_type == PacketType::AsciiFrame.to_wire() => {
                    saw_frame = true;
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        assert!(saw_frame, "no ASCII_FRAME reached the second client");

        // Disconnect alice; within a reap cycle the slot frees and bob
        // sees a SERVER_STATE with one connection.
        drop(c1);
        assert!(wait_until(Duration::from_secs(5), || {
            ctx.manager.client_count() == 1
        }));

        ctx.shutdown.trigger();
        run.join().unwrap().unwrap();
    }

    #[test]
    fn test_shutdown_liveness_and_pool_balance() {
        let server = Server::bind(test_config()).unwrap();
        let addr = server.local_addr().unwrap();
        let ctx = server.context();
        let run = thread::spawn(move || server.run());

        let mut clients: Vec<TcpStream> = (0..3)
            .map(|i| join_client(addr, &format!("client{}", i)))
            .collect();
        assert!(wait_until(Duration::from_secs(5), || {
            ctx.manager.client_count() == 3
        }));
        // Keep data in flight while shutdown lands.
        let frame = encode_image_payload(8, 8, &vec![200u8; 8 * 8 * 3]);
        for stream in clients.iter_mut() {
            write_packet(stream, PacketType::ImageFrame, 0, &frame).unwrap();
        }

        let start = Instant::now();
        ctx.shutdown.trigger();
        run.join().unwrap().unwrap();
        // Threads joined within the accept/recv/send timeout budget.
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(ctx.manager.client_count(), 0);
        assert_eq!(ctx.pool.in_use(), 0, "pool buffers leaked");

        // Clients observe EOF.
        for stream in clients.iter_mut() {
            stream
                .set_read_timeout(Some(Duration::from_secs(2)))
                .unwrap();
            let mut sink = [0u8; 4096];
            loop {
                match stream.read(&mut sink) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }

    #[test]
    fn test_server_state_broadcast_on_join() {
        let server = Server::bind(test_config()).unwrap();
        let addr = server.local_addr().unwrap();
        let ctx = server.context();
        let run = thread::spawn(move || server.run());

        let c1 = join_client(addr, "first");
        let _c2 = join_client(addr, "second");

        // First client sees a SERVER_STATE carrying the new count.
        let mut reader = c1.try_clone().unwrap();
        reader
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let pool = ctx.pool.clone();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut saw_two = false;
        while Instant::now() < deadline {
            match read_packet(&mut reader, &pool) {
                Ok(ReadOutcome::Packet(p))
                    if p.wire_type == PacketType::ServerState.to_wire() =>
                {
                    let info = ServerStateInfo::decode(&p.payload).unwrap();
                    if info.connected == 2 {
                        saw_two = true;
                        break;
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        assert!(saw_two, "no SERVER_STATE{{connected=2}} seen");

        ctx.shutdown.trigger();
        run.join().unwrap().unwrap();
    }

    #[test]
    fn test_shutdown_signal_semantics() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_set());
        assert!(!signal.wait_timeout(Duration::from_millis(5)));
        signal.trigger();
        assert!(signal.is_set());
        let start = Instant::now();
        assert!(signal.wait_timeout(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
