//! The four session threads bound to one client record.
//!
//! Receive parses inbound packets into the media rings; send drains the
//! outbound queues with audio priority; the two render threads pace
//! themselves by clock and produce this client's personalized mosaic and
//! mix. All of them gate on the record's run flag and the global shutdown
//! signal, and none of them ever takes the manager write lock.

use std::io;
use std::net::TcpStream;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::error::ProtocolError;
use crate::protocol::caps::{JoinInfo, TerminalCaps};
use crate::protocol::codec::{read_packet, write_packet, RawPacket, ReadOutcome};
use crate::protocol::frames::{
    decode_batch_samples, decode_raw_samples, downmix_to_mono, encode_ascii_frame,
    encode_audio_batch, validate_image_payload, AudioBatchHeader, BATCH_SAMPLES,
    MIX_SAMPLE_RATE,
};
use crate::protocol::{PacketType, STREAM_AUDIO, STREAM_VIDEO};
use crate::render::dither::DitherBuffer;
use crate::render::renderer::render_canvas;
use crate::render::RenderMode;
use crate::server::ServerContext;
use crate::video::compositor::{compose, SourceFrame};
use crate::video::frame::VideoFrame;

use super::ClientRecord;

/// Socket read timeout; bounds how long teardown can wait on the receiver.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Socket write timeout; a peer that stops draining is declared dead.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle wait in the send loop, on the shutdown condition.
const SEND_IDLE_WAIT: Duration = Duration::from_millis(1);

/// Video render cadence (~60 Hz).
const VIDEO_TICK: Duration = Duration::from_micros(16_667);

/// Audio render cadence: one batch period at the mix rate.
const AUDIO_TICK: Duration =
    Duration::from_nanos(BATCH_SAMPLES as u64 * 1_000_000_000 / MIX_SAMPLE_RATE as u64);

/// Ticks the pacer may fall behind before resynchronizing to now.
const MAX_TICK_BACKLOG: u32 = 8;

/// Spawn the receive, send, video-render and audio-render threads for a
/// freshly added record and store their handles on it.
pub fn spawn_client_threads(
    ctx: &Arc<ServerContext>,
    record: &Arc<ClientRecord>,
) -> io::Result<()> {
    let recv_stream = record.clone_stream()?;
    let send_stream = record.clone_stream()?;

    let receive = {
        let (ctx, record) = (ctx.clone(), record.clone());
        thread::spawn(move || receive_loop(&ctx, &record, recv_stream))
    };
    let send = {
        let (ctx, record) = (ctx.clone(), record.clone());
        thread::spawn(move || send_loop(&ctx, &record, send_stream))
    };
    let video_render = {
        let (ctx, record) = (ctx.clone(), record.clone());
        thread::spawn(move || video_render_loop(&ctx, &record))
    };
    let audio_render = {
        let (ctx, record) = (ctx.clone(), record.clone());
        thread::spawn(move || audio_render_loop(&ctx, &record))
    };
    record.store_threads(receive, send, video_render, audio_render);
    Ok(())
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Receive
// ---------------------------------------------------------------------------

fn receive_loop(ctx: &Arc<ServerContext>, record: &Arc<ClientRecord>, mut stream: TcpStream) {
    if let Err(e) = stream.set_read_timeout(Some(RECV_TIMEOUT)) {
        log::warn!("client {}: read timeout setup failed: {}", record.client_id, e);
    }
    let mut sample_scratch: Vec<f32> = Vec::with_capacity(2 * BATCH_SAMPLES);

    while record.is_running() && !ctx.shutdown.is_set() {
        match read_packet(&mut stream, &ctx.pool) {
            Ok(ReadOutcome::Idle) => continue,
            Ok(ReadOutcome::Closed) => {
                log::info!("client {} disconnected", record.client_id);
                break;
            }
            Ok(ReadOutcome::Packet(raw)) => {
                dispatch_packet(ctx, record, raw, &mut sample_scratch);
            }
            Err(ProtocolError::Io(e)) => {
                if !ctx.shutdown.is_set() && record.is_running() {
                    log::warn!("client {}: receive error: {}", record.client_id, e);
                }
                break;
            }
            Err(e) => {
                if !ctx.shutdown.is_set() {
                    log::warn!("client {}: protocol violation: {}", record.client_id, e);
                }
                break;
            }
        }
    }
    record.active.store(false, Ordering::SeqCst);
}

fn dispatch_packet(
    ctx: &Arc<ServerContext>,
    record: &Arc<ClientRecord>,
    raw: RawPacket,
    sample_scratch: &mut Vec<f32>,
) {
    let packet_type = match PacketType::from_wire(raw.wire_type) {
        Some(ty) => ty,
        None => {
            record.unknown_packets.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "client {}: unknown packet type {}",
                record.client_id,
                raw.wire_type
            );
            return;
        }
    };

    match packet_type {
        PacketType::ClientJoin => match JoinInfo::decode(&raw.payload) {
            Ok(info) => {
                log::info!(
                    "client {} joined as {:?} (video={} audio={})",
                    record.client_id,
                    info.display_name,
                    info.flags.can_send_video,
                    info.flags.can_send_audio
                );
                let mut state = record.state.lock();
                state.display_name = info.display_name;
                state.flags = info.flags;
            }
            Err(e) => log::warn!("client {}: bad JOIN payload: {}", record.client_id, e),
        },
        PacketType::StreamStart | PacketType::StreamStop => {
            if raw.payload.len() < 4 {
                log::warn!("client {}: short stream toggle", record.client_id);
                return;
            }
            let bits = u32::from_be_bytes([
                raw.payload[0],
                raw.payload[1],
                raw.payload[2],
                raw.payload[3],
            ]);
            let on = packet_type == PacketType::StreamStart;
            if bits & STREAM_VIDEO != 0 {
                record.is_sending_video.store(on, Ordering::SeqCst);
            }
            if bits & STREAM_AUDIO != 0 {
                record.is_sending_audio.store(on, Ordering::SeqCst);
            }
        }
        PacketType::ImageFrame => match validate_image_payload(&raw.payload) {
            Ok(_) => {
                record
                    .video_ring
                    .write_frame(record.client_id, now_micros(), raw.payload);
                record.frames_received.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => log::warn!("client {}: rejected frame: {}", record.client_id, e),
        },
        PacketType::AudioBatch => match AudioBatchHeader::decode(&raw.payload) {
            Ok(header) => {
                decode_batch_samples(&raw.payload, sample_scratch);
                downmix_to_mono(sample_scratch, header.channels);
                record.audio_ring.write(sample_scratch);
            }
            Err(e) => log::warn!("client {}: rejected audio batch: {}", record.client_id, e),
        },
        PacketType::Audio => {
            decode_raw_samples(&raw.payload, sample_scratch);
            record.audio_ring.write(sample_scratch);
        }
        PacketType::ClientCapabilities => match TerminalCaps::decode(&raw.payload) {
            Ok(caps) => apply_capabilities(ctx, record, caps),
            Err(e) => log::warn!("client {}: bad capabilities: {}", record.client_id, e),
        },
        PacketType::Ping => {
            record
                .video_queue
                .enqueue_copy(PacketType::Pong, &[], 0);
        }
        PacketType::Pong => {}
        // Server-to-client types arriving inbound are dropped like unknowns.
        PacketType::AsciiFrame | PacketType::ServerState | PacketType::ClearConsole => {
            record.unknown_packets.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Apply a capability update and rebuild the palette LUT. A failed rebuild
/// keeps the previous palette.
fn apply_capabilities(ctx: &Arc<ServerContext>, record: &Arc<ClientRecord>, caps: TerminalCaps) {
    let server_palette = ctx.config.palette_chars();
    let glyphs = match caps.custom_palette.as_deref() {
        Some(custom) if !custom.is_empty() => custom,
        _ => caps
            .palette_type
            .preset_chars()
            .unwrap_or(server_palette),
    };
    log::debug!(
        "client {}: caps {}x{} color={:?} mode={:?}",
        record.client_id,
        caps.width,
        caps.height,
        caps.color_level,
        caps.render_mode
    );
    let mut state = record.state.lock();
    if let Err(e) = state.palette.rebuild(glyphs) {
        log::warn!("client {}: palette rejected: {}", record.client_id, e);
    }
    state.term = caps;
}

// ---------------------------------------------------------------------------
// Send
// ---------------------------------------------------------------------------

fn send_loop(ctx: &Arc<ServerContext>, record: &Arc<ClientRecord>, mut stream: TcpStream) {
    if let Err(e) = stream.set_write_timeout(Some(SEND_TIMEOUT)) {
        log::warn!("client {}: write timeout setup failed: {}", record.client_id, e);
    }

    while record.is_running() && !ctx.shutdown.is_set() {
        // Audio strictly before video: a late mix batch is audible, a late
        // mosaic frame is not.
        let packet = record
            .audio_queue
            .try_dequeue()
            .or_else(|| record.video_queue.try_dequeue());
        let packet = match packet {
            Some(packet) => packet,
            None => {
                ctx.shutdown.wait_timeout(SEND_IDLE_WAIT);
                continue;
            }
        };

        if let Err(e) = write_packet(
            &mut stream,
            packet.packet_type,
            packet.sender_id,
            &packet.payload,
        ) {
            if !ctx.shutdown.is_set() && record.is_running() {
                log::warn!("client {}: send error: {}", record.client_id, e);
            }
            record.active.store(false, Ordering::SeqCst);
            break;
        }
        if packet.packet_type == PacketType::AsciiFrame {
            record.frames_sent.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ---------------------------------------------------------------------------
// Render pacing
// ---------------------------------------------------------------------------

/// Clock-paced loop: waits out each tick on the shutdown condition (so a
/// broadcast wakes it immediately) and resynchronizes after long stalls.
fn paced_loop<F: FnMut()>(
    ctx: &Arc<ServerContext>,
    record: &Arc<ClientRecord>,
    period: Duration,
    mut tick: F,
) {
    let mut next_tick = Instant::now() + period;
    while record.is_running() && !ctx.shutdown.is_set() {
        let now = Instant::now();
        if now < next_tick {
            ctx.shutdown.wait_timeout(next_tick - now);
            continue;
        }
        next_tick += period;
        if now > next_tick + period * MAX_TICK_BACKLOG {
            next_tick = now + period;
        }
        tick();
    }
}

// ---------------------------------------------------------------------------
// Video render
// ---------------------------------------------------------------------------

fn video_render_loop(ctx: &Arc<ServerContext>, record: &Arc<ClientRecord>) {
    let mut dither = DitherBuffer::new();
    paced_loop(ctx, record, VIDEO_TICK, || {
        video_render_pass(ctx, record, &mut dither);
    });
}

fn video_render_pass(ctx: &Arc<ServerContext>, record: &Arc<ClientRecord>, dither: &mut DitherBuffer) {
    let snapshot = record.caps_snapshot();
    if !snapshot.palette.is_initialized() {
        record.renders_skipped.fetch_add(1, Ordering::Relaxed);
        return;
    }

    // Enumerate senders under the manager read lock only; all pixel work
    // happens on the released snapshot.
    let senders = ctx.manager.snapshot();
    let mut sources: Vec<SourceFrame> = Vec::with_capacity(senders.len());
    for sender in &senders {
        if !sender.is_active() || !sender.is_sending_video.load(Ordering::SeqCst) {
            continue;
        }
        let frame = match sender.video_ring.read_latest() {
            Some(buffered) => match VideoFrame::from_wire(&buffered.data) {
                Ok(frame) => {
                    *sender.cached_frame.lock() = Some(frame.clone());
                    Some(frame)
                }
                Err(e) => {
                    log::warn!("client {}: dropping invalid frame: {}", sender.client_id, e);
                    None
                }
            },
            None => sender.cached_frame.lock().clone(),
        };
        if let Some(frame) = frame {
            sources.push(SourceFrame {
                client_id: sender.client_id,
                frame,
            });
        }
    }

    // Skip the tick entirely when nobody has a frame.
    if sources.is_empty() {
        return;
    }

    // A layout change invalidates whatever mosaic the client last drew.
    let layout_changed = {
        let mut state = record.state.lock();
        let changed = state.last_sender_count != sources.len();
        state.last_sender_count = sources.len();
        changed
    };
    if layout_changed {
        record
            .video_queue
            .enqueue_copy(PacketType::ClearConsole, &[], 0);
    }

    let mode = snapshot.effective_mode();
    let half_block = mode == RenderMode::HalfBlock;
    let canvas = match compose(&sources, snapshot.width, snapshot.height, half_block) {
        Some(canvas) => canvas,
        None => return,
    };
    let ansi = match render_canvas(
        &canvas,
        snapshot.color_level,
        mode,
        &snapshot.palette,
        Some(dither),
    ) {
        Ok(ansi) => ansi,
        Err(e) => {
            record.renders_skipped.fetch_add(1, Ordering::Relaxed);
            log::debug!("client {}: render skipped: {}", record.client_id, e);
            return;
        }
    };

    let payload = encode_ascii_frame(snapshot.width as u32, snapshot.height as u32, ansi.as_bytes());
    record
        .video_queue
        .enqueue(PacketType::AsciiFrame, ctx.pool.adopt(payload), 0);
}

// ---------------------------------------------------------------------------
// Audio render
// ---------------------------------------------------------------------------

fn audio_render_loop(ctx: &Arc<ServerContext>, record: &Arc<ClientRecord>) {
    if !ctx.config.audio_enabled {
        return;
    }
    let mut batch = [0.0f32; BATCH_SAMPLES];
    paced_loop(ctx, record, AUDIO_TICK, || {
        // Everyone except the receiver's own voice.
        ctx.mixer.process_excluding(&mut batch, record.client_id);
        let payload = encode_audio_batch(&batch, MIX_SAMPLE_RATE, 1);
        record
            .audio_queue
            .enqueue(PacketType::AudioBatch, ctx.pool.adopt(payload), 0);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::caps::TerminalCaps;
    use crate::protocol::codec::read_packet;
    use crate::protocol::frames::encode_image_payload;
    use crate::server::RuntimeConfig;
    use std::net::{SocketAddr, TcpListener};

    fn context() -> Arc<ServerContext> {
        ServerContext::new(RuntimeConfig::default())
    }

    fn connected_record(
        ctx: &Arc<ServerContext>,
        listener: &TcpListener,
    ) -> (Arc<ClientRecord>, TcpStream) {
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer): (TcpStream, SocketAddr) = listener.accept().unwrap();
        let record = ctx
            .manager
            .add_client(stream, peer, &ctx.pool, &ctx.mixer)
            .unwrap();
        (record, client)
    }

    fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_send_loop_audio_before_video() {
        let ctx = context();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (record, client) = connected_record(&ctx, &listener);

        // Video queued first, audio second; the wire order must be audio
        // first anyway.
        record
            .video_queue
            .enqueue_copy(PacketType::AsciiFrame, b"frame", 0);
        record
            .audio_queue
            .enqueue_copy(PacketType::AudioBatch, b"batch", 0);

        let send_stream = record.clone_stream().unwrap();
        let sender = {
            let (ctx, record) = (ctx.clone(), record.clone());
            thread::spawn(move || send_loop(&ctx, &record, send_stream))
        };

        let mut reader = client.try_clone().unwrap();
        reader
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let first = match read_packet(&mut reader, &ctx.pool).unwrap() {
            ReadOutcome::Packet(p) => p,
            other => panic!("unexpected {:?}", other),
        };
        let second = match read_packet(&mut reader, &ctx.pool).unwrap() {
            ReadOutcome::Packet(p) => p,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(first.wire_type, PacketType::AudioBatch.to_wire());
        assert_eq!(second.wire_type, PacketType::AsciiFrame.to_wire());

        record.running.store(false, Ordering::SeqCst);
        sender.join().unwrap();
    }

    #[test]
    fn test_receive_loop_ingests_media() {
        let ctx = context();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (record, mut client) = connected_record(&ctx, &listener);

        let recv_stream = record.clone_stream().unwrap();
        let receiver = {
            let (ctx, record) = (ctx.clone(), record.clone());
            thread::spawn(move || receive_loop(&ctx, &record, recv_stream))
        };

        // An invalid frame is rejected but the connection survives.
        let bad = encode_image_payload(4, 4, &[0u8; 10]);
        write_packet(&mut client, PacketType::ImageFrame, 0, &bad).unwrap();
        // A valid frame lands in the ring.
        let good = encode_image_payload(4, 4, &[50u8; 48]);
        write_packet(&mut client, PacketType::ImageFrame, 0, &good).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            record.video_ring.occupancy() == 1
        }));
        assert_eq!(record.frames_received.load(Ordering::Relaxed), 1);
        assert!(record.is_active());

        // Capabilities build the palette.
        let caps = TerminalCaps {
            width: 20,
            height: 10,
            ..TerminalCaps::default()
        };
        write_packet(&mut client, PacketType::ClientCapabilities, 0, &caps.encode()).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            record.state.lock().palette.is_initialized()
        }));

        // Audio samples land in the audio ring.
        let batch = encode_audio_batch(&[0.5f32; 32], MIX_SAMPLE_RATE, 1);
        write_packet(&mut client, PacketType::AudioBatch, 0, &batch).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            record.audio_ring.occupancy() == 32
        }));

        // Clean client close flips the record inactive and ends the loop.
        drop(client);
        receiver.join().unwrap();
        assert!(!record.is_active());
    }

    #[test]
    fn test_receive_loop_fatal_on_bad_magic() {
        let ctx = context();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (record, mut client) = connected_record(&ctx, &listener);

        let recv_stream = record.clone_stream().unwrap();
        let receiver = {
            let (ctx, record) = (ctx.clone(), record.clone());
            thread::spawn(move || receive_loop(&ctx, &record, recv_stream))
        };

        use std::io::Write;
        client.write_all(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        receiver.join().unwrap();
        assert!(!record.is_active());
    }

    #[test]
    fn test_ping_answered_with_pong() {
        let ctx = context();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (record, mut client) = connected_record(&ctx, &listener);

        let recv_stream = record.clone_stream().unwrap();
        let receiver = {
            let (ctx, record) = (ctx.clone(), record.clone());
            thread::spawn(move || receive_loop(&ctx, &record, recv_stream))
        };

        write_packet(&mut client, PacketType::Ping, 0, &[]).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            record.video_queue.len() == 1
        }));
        let pong = record.video_queue.try_dequeue().unwrap();
        assert_eq!(pong.packet_type, PacketType::Pong);

        drop(client);
        receiver.join().unwrap();
    }
}
