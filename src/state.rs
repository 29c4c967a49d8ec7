//! Data model (spec.md §3): `PlayerContext` and its four facets. In the
//! original C these are guarded by three separate mutexes (stream/output/
//! decode); per REDESIGN FLAGS this crate instead gives the protocol
//! thread sole ownership of the struct and has other actors report facts
//! in via `PlayerEvent`, so there is nothing left to lock here.

use std::net::Ipv4Addr;
use std::time::Instant;

use crate::buffer::BufferStatus;
use crate::wire::StrmCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Stopped,
    StreamingWait,
    StreamingBuffering,
    StreamingHttp,
    StreamingFile,
    Disconnect,
}

/// Mirrors the original `disconnect_code` enum (slimproto.c / squeezelite).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Ok,
    LocalClosed,
    RemoteClosed,
    Unreachable,
    Timeout,
}

impl DisconnectReason {
    pub fn as_wire_byte(self) -> u8 {
        match self {
            DisconnectReason::Ok => 0,
            DisconnectReason::LocalClosed => 1,
            DisconnectReason::RemoteClosed => 2,
            DisconnectReason::Unreachable => 3,
            DisconnectReason::Timeout => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Stopped,
    Waiting,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    Stopped,
    Ready,
    Running,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeMode {
    Thru,
    Pcm,
    Flac,
    Mp3,
}

#[derive(Debug, Clone)]
pub struct StreamFacet {
    pub state: StreamState,
    pub disconnect: DisconnectReason,
    pub bytes_received: u64,
    pub headers: Vec<u8>,
    pub sent_headers: bool,
    pub meta_interval: u32,
    pub meta_next: u32,
    pub meta_send: bool,
    pub meta_block: Vec<u8>,
}

impl Default for StreamFacet {
    fn default() -> Self {
        StreamFacet {
            state: StreamState::Stopped,
            disconnect: DisconnectReason::Ok,
            bytes_received: 0,
            headers: Vec::new(),
            sent_headers: false,
            meta_interval: 0,
            meta_next: 0,
            meta_send: false,
            meta_block: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncodeParams {
    pub mode: EncodeMode,
    pub sample_rate: u32,
    pub sample_size: u8,
    pub channels: u8,
    pub level: u8,
    pub flow: bool,
}

impl Default for EncodeParams {
    fn default() -> Self {
        EncodeParams {
            mode: EncodeMode::Thru,
            sample_rate: 0,
            sample_size: 0,
            channels: 0,
            level: 0,
            flow: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputFacet {
    pub state: OutputState,
    pub index: u64,
    pub codec: u8,
    pub sample_size: u8,
    pub sample_rate: u32,
    pub channels: u8,
    pub in_endian: u8,
    pub encode: EncodeParams,
    pub mimetype: String,
    pub fade_mode: u8,
    pub fade_secs: u8,
    pub next_replay_gain: u32,
    pub track_started: bool,
    pub completed: bool,
    pub remote: bool,
    pub duration: u32,
    pub start_at: u32,
    pub icy_interval: u32,
    pub icy_last: Instant,
}

impl Default for OutputFacet {
    fn default() -> Self {
        OutputFacet {
            state: OutputState::Stopped,
            index: 0,
            codec: b'?',
            sample_size: 0,
            sample_rate: 0,
            channels: 0,
            in_endian: 0xff,
            encode: EncodeParams::default(),
            mimetype: String::new(),
            fade_mode: 0,
            fade_secs: 0,
            next_replay_gain: 0,
            track_started: false,
            completed: false,
            remote: false,
            duration: 0,
            start_at: 0,
            icy_interval: 0,
            icy_last: Instant::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderFacet {
    pub state: RenderState,
    pub duration: u32,
    pub ms_played: u32,
    /// -1 (`None`) means "no valid current track", matching the original's
    /// `render.index != -1` check (spec.md §4.6).
    pub index: Option<u64>,
}

impl Default for RenderFacet {
    fn default() -> Self {
        RenderFacet {
            state: RenderState::Stopped,
            duration: 0,
            ms_played: 0,
            index: None,
        }
    }
}

/// Status snapshot published to outbound STAT (spec.md §3).
#[derive(Debug, Clone, Default)]
pub struct PlayerStatus {
    pub stream_full: usize,
    pub stream_size: usize,
    pub stream_bytes: u64,
    pub output_full: usize,
    pub output_size: usize,
    pub ms_played: u32,
}

/// Sticky flags (spec.md §3), cleared on every `strm s`.
#[derive(Debug, Clone, Default)]
pub struct StickyFlags {
    pub can_stmdu: bool,
    pub sent_stmu: bool,
    pub sent_stmo: bool,
    pub sent_stml: bool,
    pub sent_stmd: bool,
    pub autostart: u8,
    pub last_command: Option<StrmCommand>,
}

impl StickyFlags {
    /// Cleared by `strm s` (spec.md invariant 3).
    pub fn reset_for_new_track(&mut self) {
        self.can_stmdu = false;
        self.sent_stmu = false;
        self.sent_stmo = false;
        self.sent_stml = false;
        self.sent_stmd = false;
    }
}

/// One per emulated player (spec.md §3).
pub struct PlayerContext {
    pub mac: [u8; 6],
    pub name: String,
    pub fixed_cap: String,
    pub var_cap: String,

    pub server_ip: Ipv4Addr,
    pub server_port: u16,
    pub cli_port: u16,
    pub new_server: Option<Ipv4Addr>,
    pub new_server_cap: Option<String>,

    pub stream: StreamFacet,
    pub streambuf: BufferStatus,
    pub output: OutputFacet,
    pub outputbuf: BufferStatus,
    pub decode_state: DecodeState,
    pub render: RenderFacet,

    pub status: PlayerStatus,
    pub sticky: StickyFlags,

    pub last_tick: Instant,
    pub last_stmt: Instant,
}

impl PlayerContext {
    pub fn new(mac: [u8; 6], name: String) -> Self {
        let now = Instant::now();
        PlayerContext {
            mac,
            name,
            fixed_cap: String::new(),
            var_cap: String::new(),
            server_ip: Ipv4Addr::UNSPECIFIED,
            server_port: crate::wire::SLIM_PORT,
            cli_port: 0,
            new_server: None,
            new_server_cap: None,
            stream: StreamFacet::default(),
            streambuf: BufferStatus::default(),
            output: OutputFacet::default(),
            outputbuf: BufferStatus::default(),
            decode_state: DecodeState::Stopped,
            render: RenderFacet::default(),
            status: PlayerStatus::default(),
            sticky: StickyFlags::default(),
            last_tick: now,
            last_stmt: now,
        }
    }
}

/// Facts reported into the protocol thread by the streamer/decoder/render
/// actors (REDESIGN FLAGS: replaces the three mutexes with a channel of
/// events the protocol thread alone consumes).
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    BytesReceived(u64),
    HeaderCaptured(Vec<u8>),
    StreamStateChanged(StreamState),
    StreamDisconnected(DisconnectReason),
    MetaReady(Vec<u8>),
    TrackStarted,
    OutputStateChanged(OutputState),
    DecodeStateChanged(DecodeState),
    RenderStateChanged(RenderState),
    RenderProgress { ms_played: u32, duration: u32 },
    StreamBufferUsed(usize),
    OutputBufferUsed(usize),
    NothingReceived,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sticky_flags_reset_clears_the_per_track_set() {
        let mut sticky = StickyFlags {
            can_stmdu: true,
            sent_stmu: true,
            sent_stmo: true,
            sent_stml: true,
            sent_stmd: true,
            autostart: 2,
            last_command: Some(StrmCommand::Start),
        };
        sticky.reset_for_new_track();
        assert!(!sticky.can_stmdu);
        assert!(!sticky.sent_stmu);
        assert!(!sticky.sent_stmo);
        assert!(!sticky.sent_stml);
        assert!(!sticky.sent_stmd);
        // autostart and last_command are not part of the per-track reset.
        assert_eq!(sticky.autostart, 2);
    }

    #[test]
    fn render_index_none_matches_original_sentinel() {
        let render = RenderFacet::default();
        assert_eq!(render.index, None);
    }
}
