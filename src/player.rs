//! The player state machine (C5): owns one connection's lifetime, reading
//! inbound frames, applying reported facts from other actors, and driving
//! the STMx transition rules every 100ms (spec.md §4.5).
//!
//! This is the "long-buffer discipline" module: `STMd` is withheld until
//! `canSTMdu` is set (by a completed `STMs`) and the output buffer has
//! genuinely absorbed the current track, so the next track's decode never
//! overlaps the current one's output.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;

use crate::callback::MediaRenderer;
use crate::config::PlayerConfig;
use crate::dispatch::{self, FrameReader};
use crate::error::{PlayerError, Result};
use crate::outbound;
use crate::state::{
    DecodeState, DisconnectReason, OutputState, PlayerContext, PlayerEvent, PlayerStatus,
    RenderState, StreamState,
};
use crate::wire::StatEvent;

const READ_POLL: Duration = Duration::from_millis(250);
const TICK_INTERVAL: Duration = Duration::from_millis(100);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(35);
/// How close to the end of a track (spec.md §4.5 "STREAM_DELAY") an
/// output thread may be allowed to drain before `STMd` fires without
/// waiting for the outbuf to fully settle.
const NEAR_END_THRESHOLD_MS: u32 = 5000;

/// Drives one TCP connection end to end: returns once the connection
/// drops, the caller requests a server switch via `ctx.new_server`, or
/// `running` is cleared. Ownership of `ctx` persists across reconnects so
/// sticky state (sticky flags aside, which reset per track) survives a
/// dropped socket.
pub fn drive_connection(
    read: &mut TcpStream,
    write: &mut TcpStream,
    config: &PlayerConfig,
    renderer: &dyn MediaRenderer,
    ctx: &mut PlayerContext,
    events: &Receiver<PlayerEvent>,
    running: &AtomicBool,
    status: &Mutex<PlayerStatus>,
) -> Result<DisconnectReason> {
    read.set_read_timeout(Some(READ_POLL))?;

    let connect_time = Instant::now();
    let mut frame_reader = FrameReader::new();
    let mut last_activity = Instant::now();
    let mut last_tick = Instant::now();

    loop {
        if !running.load(Ordering::Acquire) {
            return Ok(DisconnectReason::LocalClosed);
        }
        if ctx.new_server.is_some() {
            return Ok(DisconnectReason::Ok);
        }

        let mut woke = false;
        while let Ok(event) = events.try_recv() {
            apply_event(ctx, event);
            woke = true;
        }

        match frame_reader.poll(read) {
            Ok(Some(body)) => {
                if !body.is_empty() {
                    dispatch::handle_message(ctx, config, renderer, write, connect_time, &body)?;
                }
                last_activity = Instant::now();
                woke = true;
            }
            Ok(None) => {
                if last_activity.elapsed() > HEARTBEAT_TIMEOUT {
                    return Err(PlayerError::HeartbeatTimeout(HEARTBEAT_TIMEOUT));
                }
            }
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if woke || now.duration_since(last_tick) >= TICK_INTERVAL {
            last_tick = now;
            tick(ctx, renderer, write, connect_time)?;
            if let Ok(mut guard) = status.lock() {
                *guard = ctx.status.clone();
            }
        }
    }
}

fn apply_event(ctx: &mut PlayerContext, event: PlayerEvent) {
    match event {
        PlayerEvent::BytesReceived(n) => ctx.stream.bytes_received = n,
        PlayerEvent::HeaderCaptured(bytes) => {
            ctx.stream.headers = bytes;
            ctx.stream.sent_headers = false;
        }
        PlayerEvent::StreamStateChanged(s) => ctx.stream.state = s,
        PlayerEvent::StreamDisconnected(reason) => {
            ctx.stream.state = StreamState::Disconnect;
            ctx.stream.disconnect = reason;
        }
        PlayerEvent::MetaReady(meta) => {
            ctx.stream.meta_block = meta;
            ctx.stream.meta_send = true;
        }
        PlayerEvent::TrackStarted => ctx.output.track_started = true,
        PlayerEvent::OutputStateChanged(s) => ctx.output.state = s,
        PlayerEvent::DecodeStateChanged(s) => ctx.decode_state = s,
        PlayerEvent::RenderStateChanged(s) => ctx.render.state = s,
        PlayerEvent::RenderProgress { ms_played, duration } => {
            ctx.render.ms_played = ms_played;
            ctx.render.duration = duration;
        }
        PlayerEvent::StreamBufferUsed(n) => ctx.streambuf.set_used(n),
        PlayerEvent::OutputBufferUsed(n) => ctx.outputbuf.set_used(n),
        PlayerEvent::NothingReceived => {}
    }
}

/// One pass of the transition rules (spec.md §4.5), run every 100ms or
/// whenever an inbound frame/event "wakes" the loop early.
fn tick(
    ctx: &mut PlayerContext,
    renderer: &dyn MediaRenderer,
    write: &mut TcpStream,
    connect_time: Instant,
) -> Result<()> {
    // Captured before any mutation below, since the disconnect-code branch
    // mutates `stream.state` to `Stopped` in place (spec.md §4.5 mirrors
    // the original's pre-mutation `status.stream_state` snapshot).
    let stream_state_snapshot = ctx.stream.state;

    let mut send_stms = false;
    let mut send_dsco: Option<DisconnectReason> = None;
    let mut send_stmt = false;
    let mut send_stml = false;
    let mut send_stmd = false;
    let mut send_stmu = false;
    let mut send_stmo = false;
    let mut send_stmn = false;

    ctx.status.stream_full = ctx.streambuf.used();
    ctx.status.stream_size = ctx.streambuf.size();
    ctx.status.stream_bytes = ctx.stream.bytes_received;

    if ctx.stream.state == StreamState::Disconnect {
        send_dsco = Some(ctx.stream.disconnect);
        ctx.stream.state = StreamState::Stopped;
    }

    let send_resp = !ctx.stream.sent_headers
        && matches!(
            ctx.stream.state,
            StreamState::StreamingHttp | StreamState::StreamingWait | StreamState::StreamingBuffering
        );
    if send_resp {
        ctx.stream.sent_headers = true;
    }

    let send_meta = ctx.stream.meta_send;
    if send_meta {
        ctx.stream.meta_send = false;
    }

    ctx.status.output_full = if ctx.sticky.sent_stmu {
        0
    } else {
        ctx.outputbuf.size() / 2
    };
    ctx.status.output_size = ctx.outputbuf.size();

    if ctx.output.track_started {
        send_stms = true;
        ctx.sticky.can_stmdu = true;
        ctx.output.track_started = false;
    }

    if ctx.status.stream_bytes == 0
        && ctx.output.completed
        && ctx.output.state == OutputState::Running
    {
        log::warn!("nothing received");
        ctx.render.state = RenderState::Stopped;
        ctx.sticky.can_stmdu = true;
        send_stmn = true;
    }

    let output_ready = ctx.output.completed || ctx.output.encode.flow;

    let stream_idle = matches!(
        stream_state_snapshot,
        StreamState::Stopped | StreamState::Disconnect
    );

    if ctx.output.state == OutputState::Running
        && !ctx.sticky.sent_stmu
        && output_ready
        && stream_idle
        && ctx.render.state == RenderState::Stopped
        && ctx.sticky.can_stmdu
    {
        send_stmu = true;
        ctx.sticky.sent_stmu = true;
        ctx.status.output_full = 0;
        ctx.output.encode.flow = false;
        ctx.output.state = OutputState::Stopped;
    }

    if ctx.output.state == OutputState::Running
        && !ctx.sticky.sent_stmo
        && stream_state_snapshot == StreamState::StreamingHttp
        && ctx.render.state == RenderState::Stopped
        && ctx.sticky.can_stmdu
    {
        send_stmo = true;
        ctx.sticky.sent_stmo = true;
        ctx.output.state = OutputState::Stopped;
    }

    if ctx.decode_state == DecodeState::Running && ctx.last_stmt.elapsed() >= Duration::from_secs(1) {
        send_stmt = true;
        ctx.last_stmt = Instant::now();
    }

    let stream_ok_to_buffer = matches!(
        stream_state_snapshot,
        StreamState::StreamingHttp | StreamState::StreamingFile
    ) || (stream_state_snapshot == StreamState::Disconnect && ctx.stream.disconnect == DisconnectReason::Ok);

    if stream_ok_to_buffer && !ctx.sticky.sent_stml && ctx.decode_state == DecodeState::Ready {
        if ctx.sticky.autostart == 0 {
            ctx.decode_state = DecodeState::Running;
            send_stml = true;
            ctx.sticky.sent_stml = true;
        } else if ctx.sticky.autostart == 1 {
            ctx.decode_state = DecodeState::Running;
            ctx.output.state = OutputState::Running;
        }
        // autostart 2/3 require `cont` first; falls through without a
        // state change, but playback still starts (matches the original).
        renderer.play();
    }

    let near_end = ctx.render.duration > 0
        && ctx.render.duration.saturating_sub(ctx.render.ms_played) < NEAR_END_THRESHOLD_MS;

    let mut stream_disconnect_now = false;

    if (ctx.decode_state == DecodeState::Complete
        && ctx.sticky.can_stmdu
        && output_ready
        && (ctx.output.encode.flow || !ctx.output.remote || near_end))
        || ctx.decode_state == DecodeState::Error
    {
        if ctx.decode_state == DecodeState::Complete {
            send_stmd = true;
        }
        if ctx.decode_state == DecodeState::Error {
            send_stmn = true;
        }
        ctx.decode_state = DecodeState::Stopped;
        if matches!(
            stream_state_snapshot,
            StreamState::StreamingHttp | StreamState::StreamingFile
        ) {
            stream_disconnect_now = true;
        }
    }

    if stream_disconnect_now {
        ctx.stream.state = StreamState::Disconnect;
        ctx.stream.disconnect = DisconnectReason::Ok;
    }

    if let Some(reason) = send_dsco {
        outbound::send_dsco(write, reason.as_wire_byte())?;
    }
    if send_stms {
        outbound::send_stat(write, ctx, connect_time, StatEvent::Started, 0)?;
    }
    if send_stmt {
        outbound::send_stat(write, ctx, connect_time, StatEvent::Tick, 0)?;
    }
    if send_stml {
        outbound::send_stat(write, ctx, connect_time, StatEvent::BufferLow, 0)?;
    }
    if send_stmd {
        outbound::send_stat(write, ctx, connect_time, StatEvent::DecodeDone, 0)?;
    }
    if send_stmu {
        outbound::send_stat(write, ctx, connect_time, StatEvent::Underrun, 0)?;
    }
    if send_stmo {
        outbound::send_stat(write, ctx, connect_time, StatEvent::Overrun, 0)?;
    }
    if send_stmn {
        outbound::send_stat(write, ctx, connect_time, StatEvent::NoCodec, 0)?;
    }
    if send_resp {
        outbound::send_resp(write, &ctx.stream.headers)?;
    }
    if send_meta {
        outbound::send_meta(write, &ctx.stream.meta_block)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::test_support::RecordingRenderer;
    use std::net::{TcpListener, TcpStream};

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn track_started_triggers_stms_and_sets_can_stmdu() {
        let (_client, mut server_write) = loopback_pair();
        let mut ctx = PlayerContext::new([0; 6], "test".into());
        ctx.output.track_started = true;
        let renderer = RecordingRenderer::default();

        tick(&mut ctx, &renderer, &mut server_write, Instant::now()).unwrap();

        assert!(ctx.sticky.can_stmdu);
        assert!(!ctx.output.track_started);
    }

    #[test]
    fn decode_ready_with_autostart_zero_starts_decode_and_calls_play() {
        let (_client, mut server_write) = loopback_pair();
        let mut ctx = PlayerContext::new([0; 6], "test".into());
        ctx.stream.state = StreamState::StreamingHttp;
        ctx.decode_state = DecodeState::Ready;
        ctx.sticky.autostart = 0;
        let renderer = RecordingRenderer::default();

        tick(&mut ctx, &renderer, &mut server_write, Instant::now()).unwrap();

        assert_eq!(ctx.decode_state, DecodeState::Running);
        assert!(ctx.sticky.sent_stml);
        let calls = renderer.calls.lock().unwrap();
        assert!(calls.iter().any(|c| c == "play"));
    }

    #[test]
    fn decode_complete_waits_for_can_stmdu_before_stmd() {
        let (_client, mut server_write) = loopback_pair();
        let mut ctx = PlayerContext::new([0; 6], "test".into());
        ctx.stream.state = StreamState::StreamingHttp;
        ctx.decode_state = DecodeState::Complete;
        ctx.output.completed = true;
        ctx.sticky.can_stmdu = false; // STMs not yet sent this track
        let renderer = RecordingRenderer::default();

        tick(&mut ctx, &renderer, &mut server_write, Instant::now()).unwrap();

        // decode_state must remain Complete: no STMd without can_stmdu.
        assert_eq!(ctx.decode_state, DecodeState::Complete);
    }

    #[test]
    fn decode_complete_with_can_stmdu_and_local_track_sends_stmd() {
        let (_client, mut server_write) = loopback_pair();
        let mut ctx = PlayerContext::new([0; 6], "test".into());
        ctx.stream.state = StreamState::StreamingHttp;
        ctx.decode_state = DecodeState::Complete;
        ctx.output.completed = true;
        ctx.output.remote = false;
        ctx.sticky.can_stmdu = true;
        let renderer = RecordingRenderer::default();

        tick(&mut ctx, &renderer, &mut server_write, Instant::now()).unwrap();

        assert_eq!(ctx.decode_state, DecodeState::Stopped);
        assert_eq!(ctx.stream.state, StreamState::Disconnect);
    }
}
