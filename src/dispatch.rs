//! Inbound dispatcher (C4): length-prefixed frame reassembly and per-opcode
//! handlers (spec.md §4.4).

use std::io::Read;
use std::net::{Ipv4Addr, TcpStream};
use std::time::Instant;

use crate::callback::MediaRenderer;
use crate::capabilities::sync_group_capability;
use crate::config::PlayerConfig;
use crate::error::{PlayerError, Result};
use crate::outbound;
use crate::state::{DecodeState, OutputState, PlayerContext, StreamState};
use crate::track;
use crate::wire::{ServerMessage, StatEvent, StrmCommand, StrmPacket, MAXBUF};

/// A trailing HTTP request on `strm s` longer than this is rejected rather
/// than accepted unbounded (spec.md §4.4; the original guards the same way
/// against its fixed-size header buffer).
const MAX_HEADER_LEN: usize = 2048;

fn would_block(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// Reassembles inbound frames from a stream of partial reads: a 2-byte
/// big-endian length, then that many body bytes, the first 4 of which are
/// the ASCII opcode (spec.md §4.1). Persists partial progress across
/// `poll` calls so a read timeout mid-frame doesn't lose bytes already
/// read.
pub struct FrameReader {
    header: [u8; 2],
    header_got: usize,
    body: Vec<u8>,
    body_got: usize,
    body_len: Option<usize>,
}

impl FrameReader {
    pub fn new() -> Self {
        FrameReader {
            header: [0; 2],
            header_got: 0,
            body: Vec::new(),
            body_got: 0,
            body_len: None,
        }
    }

    /// One non-blocking-ish step. `Ok(None)` means no complete frame yet
    /// (the read timed out or would block); the caller should try again
    /// later. `Err` is fatal: the peer closed the socket, sent an
    /// oversize frame, or a real I/O error occurred.
    pub fn poll(&mut self, stream: &mut impl Read) -> Result<Option<Vec<u8>>> {
        if self.body_len.is_none() {
            match stream.read(&mut self.header[self.header_got..2]) {
                Ok(0) => return Err(PlayerError::PeerClosed),
                Ok(n) => self.header_got += n,
                Err(e) if would_block(&e) => return Ok(None),
                Err(e) => return Err(PlayerError::Io(e)),
            }
            if self.header_got < 2 {
                return Ok(None);
            }
            let len = u16::from_be_bytes(self.header) as usize;
            self.header_got = 0;
            if len > MAXBUF {
                return Err(PlayerError::OversizeFrame { len, max: MAXBUF });
            }
            if len == 0 {
                return Ok(Some(Vec::new()));
            }
            self.body = vec![0u8; len];
            self.body_got = 0;
            self.body_len = Some(len);
        }

        let len = self.body_len.unwrap();
        match stream.read(&mut self.body[self.body_got..len]) {
            Ok(0) => return Err(PlayerError::PeerClosed),
            Ok(n) => self.body_got += n,
            Err(e) if would_block(&e) => return Ok(None),
            Err(e) => return Err(PlayerError::Io(e)),
        }
        if self.body_got == len {
            self.body_len = None;
            Ok(Some(std::mem::take(&mut self.body)))
        } else {
            Ok(None)
        }
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        FrameReader::new()
    }
}

/// Decodes one inbound frame body and applies it to `ctx`, sending any
/// reply frames the handler produces directly on `write`.
pub fn handle_message(
    ctx: &mut PlayerContext,
    config: &PlayerConfig,
    renderer: &dyn MediaRenderer,
    write: &mut TcpStream,
    connect_time: Instant,
    body: &[u8],
) -> Result<()> {
    let msg = match ServerMessage::decode(body) {
        Ok(msg) => msg,
        Err(e) => {
            log::warn!("failed to decode inbound frame: {e}");
            return Ok(());
        }
    };

    match msg {
        ServerMessage::Strm(strm) => handle_strm(ctx, config, renderer, write, connect_time, strm)?,
        ServerMessage::Cont(cont) => {
            if ctx.sticky.autostart > 1 {
                ctx.sticky.autostart -= 2;
                if ctx.stream.state == StreamState::StreamingWait {
                    ctx.stream.state = StreamState::StreamingBuffering;
                    ctx.stream.meta_interval = cont.metaint;
                    ctx.stream.meta_next = cont.metaint;
                }
            }
        }
        ServerMessage::Codc(params) => {
            let decoded = track::decode_pcm_params(params.format, params, config.max_sample_rate);
            let ok = track::prepare_track(ctx, config, renderer, params.format, decoded);
            if !ok {
                log::error!("codc: no matching codec {}", params.format as char);
                outbound::send_stat(write, ctx, connect_time, StatEvent::NoCodec, 0)?;
            }
        }
        ServerMessage::Aude { spdif, .. } => {
            renderer.on_off(spdif);
        }
        ServerMessage::Audg {
            old_gain_l,
            old_gain_r,
            adjust,
        } => {
            // Corrected average of both channels; the original averages
            // the left channel with itself (spec.md §12).
            let gain = ((old_gain_l as u64 + old_gain_r as u64) / 2) as u16;
            if adjust {
                renderer.volume(gain);
            }
        }
        ServerMessage::Setd { id, data } => {
            if id == 0 {
                if data.is_empty() {
                    if !ctx.name.is_empty() {
                        outbound::send_setd_name(write, &ctx.name)?;
                    }
                } else {
                    let name = String::from_utf8_lossy(&data)
                        .trim_end_matches('\0')
                        .to_string();
                    ctx.name = name.clone();
                    outbound::send_setd_name(write, &name)?;
                    renderer.set_name(&name);
                }
            }
        }
        ServerMessage::Serv { ip, sync_group_id } => {
            ctx.new_server = Some(ip);
            ctx.new_server_cap = if sync_group_id.is_some() {
                Some(sync_group_capability(sync_group_id.as_ref()))
            } else {
                None
            };
            renderer.set_server(ip);
        }
        ServerMessage::Vers(version) => {
            log::debug!("server version {version}");
        }
        ServerMessage::Ledc(_) => {
            log::debug!("ledc");
        }
        ServerMessage::Unknown { opcode, .. } => {
            log::warn!("unhandled opcode {:?}", String::from_utf8_lossy(&opcode));
        }
    }

    Ok(())
}

fn handle_strm(
    ctx: &mut PlayerContext,
    config: &PlayerConfig,
    renderer: &dyn MediaRenderer,
    write: &mut TcpStream,
    connect_time: Instant,
    strm: StrmPacket,
) -> Result<()> {
    if !matches!(strm.command, StrmCommand::Time | StrmCommand::Stop) {
        log::info!("strm command {}", strm.command.as_char());
    } else {
        log::debug!("strm command {}", strm.command.as_char());
    }

    match strm.command {
        StrmCommand::Time => {
            outbound::send_stat(write, ctx, connect_time, StatEvent::Tick, strm.replay_gain)?;
        }
        StrmCommand::Flush => {
            ctx.streambuf.reset();
            ctx.outputbuf.reset();
            ctx.stream.state = StreamState::Stopped;
            ctx.decode_state = DecodeState::Stopped;
            ctx.status.ms_played = 0;
            outbound::send_stat(write, ctx, connect_time, StatEvent::Flushed, 0)?;
        }
        StrmCommand::Stop => {
            ctx.streambuf.reset();
            ctx.outputbuf.reset();
            ctx.status.ms_played = 0;
            let had_stream = ctx.stream.state != StreamState::Stopped;
            ctx.stream.state = StreamState::Stopped;
            ctx.decode_state = DecodeState::Stopped;
            if had_stream {
                outbound::send_stat(write, ctx, connect_time, StatEvent::Flushed, 0)?;
            }
            if ctx.sticky.last_command != Some(StrmCommand::Stop) {
                renderer.stop();
            }
        }
        StrmCommand::Pause => {
            if strm.replay_gain == 0 {
                ctx.output.state = OutputState::Waiting;
                renderer.pause();
                outbound::send_stat(write, ctx, connect_time, StatEvent::Paused, 0)?;
            }
        }
        StrmCommand::SkipAhead => {
            log::info!("skip ahead interval (ignored): {}", strm.replay_gain);
        }
        StrmCommand::Unpause => {
            let jiffies = strm.replay_gain;
            renderer.unpause(jiffies);
            ctx.output.state = OutputState::Running;
            ctx.output.start_at = jiffies;
            outbound::send_stat(write, ctx, connect_time, StatEvent::Resumed, 0)?;
        }
        StrmCommand::Start => {
            handle_strm_start(ctx, config, renderer, write, connect_time, strm)?;
        }
        StrmCommand::Unknown(b) => {
            log::warn!("unhandled strm {}", b as char);
        }
    }

    ctx.sticky.last_command = Some(strm.command);
    Ok(())
}

fn handle_strm_start(
    ctx: &mut PlayerContext,
    config: &PlayerConfig,
    renderer: &dyn MediaRenderer,
    write: &mut TcpStream,
    connect_time: Instant,
    strm: StrmPacket,
) -> Result<()> {
    let ip = if strm.server_ip == 0 {
        ctx.server_ip
    } else {
        Ipv4Addr::from(strm.server_ip)
    };
    let port = if strm.server_port == 0 {
        ctx.server_port
    } else {
        strm.server_port
    };

    ctx.sticky.autostart = strm.autostart.wrapping_sub(b'0');

    log::info!(
        "strm s autostart:{} fade:{} codec:{}",
        strm.autostart as char,
        strm.fade_secs,
        strm.params.format as char
    );

    outbound::send_stat(write, ctx, connect_time, StatEvent::Flushed, 0)?;

    if strm.http_request.len() > MAX_HEADER_LEN {
        log::warn!("header too long: {}", strm.http_request.len());
        return Ok(());
    }

    ctx.output.next_replay_gain = strm.replay_gain;
    ctx.output.fade_mode = strm.fade_mode.wrapping_sub(b'0');
    ctx.output.fade_secs = strm.fade_secs;

    let codec_ok = if strm.params.format != b'?' {
        let decoded = track::decode_pcm_params(strm.params.format, strm.params, config.max_sample_rate);
        track::prepare_track(ctx, config, renderer, strm.params.format, decoded)
    } else if ctx.sticky.autostart >= 2 {
        log::info!("waiting for codc message");
        true
    } else {
        log::error!("unknown codec requires autostart >= 2");
        return Ok(());
    };

    let _ = (ip, port); // recorded for the host-owned streamer to dial; out of scope here.

    ctx.stream.state = StreamState::StreamingWait;

    outbound::send_stat(write, ctx, connect_time, StatEvent::Connect, 0)?;
    ctx.sticky.reset_for_new_track();

    if !codec_ok {
        log::error!("no matching codec {}", ctx.output.codec as char);
        outbound::send_stat(write, ctx, connect_time, StatEvent::NoCodec, 0)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_reader_assembles_a_frame_split_across_polls() {
        let mut full = vec![0u8, 5]; // length = 5
        full.extend_from_slice(b"hello");
        let mut reader = FrameReader::new();

        let (first, second) = full.split_at(3);
        let mut cursor = Cursor::new(first.to_vec());
        assert_eq!(reader.poll(&mut cursor).unwrap(), None);

        let mut cursor2 = Cursor::new(second.to_vec());
        let body = reader.poll(&mut cursor2).unwrap();
        assert_eq!(body, Some(b"hello".to_vec()));
    }

    #[test]
    fn frame_reader_rejects_oversize_length() {
        let mut reader = FrameReader::new();
        let len = (MAXBUF + 1) as u16;
        let mut cursor = Cursor::new(len.to_be_bytes().to_vec());
        let err = reader.poll(&mut cursor).unwrap_err();
        assert!(matches!(err, PlayerError::OversizeFrame { .. }));
    }

    #[test]
    fn frame_reader_zero_length_frame_completes_immediately() {
        let mut reader = FrameReader::new();
        let mut cursor = Cursor::new(0u16.to_be_bytes().to_vec());
        let body = reader.poll(&mut cursor).unwrap();
        assert_eq!(body, Some(Vec::new()));
    }
}
