//! Wire codec (C1): pack/unpack fixed-layout slimproto frames.
//!
//! All multi-byte integers are big-endian on the wire. Inbound frames are
//! length-prefixed (2-byte length, then that many body bytes whose first 4
//! bytes are the ASCII opcode); outbound frames use a 4-byte opcode followed
//! by a 4-byte body length, per spec.md §4.1.

use std::net::Ipv4Addr;

use crate::error::{PlayerError, Result};

/// Maximum inbound frame body length (spec.md §3 invariant 5).
pub const MAXBUF: usize = 4096;

/// Default slimproto TCP/UDP port.
pub const SLIM_PORT: u16 = 3483;

/// Fixed-size header of a `strm` packet, not counting the trailing HTTP
/// request bytes (spec.md §4.4: "24-byte header + optional HTTP request
/// bytes").
pub const STRM_HEADER_LEN: usize = 24;

fn read_u16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn read_u64(b: &[u8]) -> u64 {
    u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

/// The `strm` subcommand byte, named per spec.md §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrmCommand {
    Time,
    Flush,
    Stop,
    Pause,
    SkipAhead,
    Unpause,
    Start,
    Unknown(u8),
}

impl From<u8> for StrmCommand {
    fn from(b: u8) -> Self {
        match b {
            b't' => StrmCommand::Time,
            b'f' => StrmCommand::Flush,
            b'q' => StrmCommand::Stop,
            b'p' => StrmCommand::Pause,
            b'a' => StrmCommand::SkipAhead,
            b'u' => StrmCommand::Unpause,
            b's' => StrmCommand::Start,
            other => StrmCommand::Unknown(other),
        }
    }
}

impl StrmCommand {
    pub fn as_char(self) -> char {
        match self {
            StrmCommand::Time => 't',
            StrmCommand::Flush => 'f',
            StrmCommand::Stop => 'q',
            StrmCommand::Pause => 'p',
            StrmCommand::SkipAhead => 'a',
            StrmCommand::Unpause => 'u',
            StrmCommand::Start => 's',
            StrmCommand::Unknown(b) => b as char,
        }
    }
}

/// Body of a `strm s` / `codc` track announcement: the raw protocol codes
/// for format/rate/size/channels/endianness, decoded by `track::decode_pcm_params`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackParams {
    pub format: u8,
    pub pcm_sample_rate: u8,
    pub pcm_sample_size: u8,
    pub pcm_channels: u8,
    pub pcm_endianness: u8,
}

#[derive(Debug, Clone)]
pub struct StrmPacket {
    pub command: StrmCommand,
    pub autostart: u8,
    pub params: TrackParams,
    pub threshold_kb: u8,
    pub fade_mode: u8,
    pub fade_secs: u8,
    /// Reused across subcommands: pause/skip-ahead interval, unpause
    /// jiffies, or next-track replay gain, per spec.md §4.4.
    pub replay_gain: u32,
    pub server_port: u16,
    pub server_ip: u32,
    pub http_request: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ContPacket {
    pub metaint: u32,
    pub loop_flag: u8,
}

#[derive(Debug, Clone)]
pub enum ServerMessage {
    Strm(StrmPacket),
    Cont(ContPacket),
    Codc(TrackParams),
    Aude { spdif: bool, dac: bool },
    Audg { old_gain_l: u32, old_gain_r: u32, adjust: bool },
    Setd { id: u8, data: Vec<u8> },
    Serv { ip: Ipv4Addr, sync_group_id: Option<[u8; 10]> },
    Vers(String),
    Ledc(Vec<u8>),
    Unknown { opcode: [u8; 4], body: Vec<u8> },
}

impl ServerMessage {
    /// Decode one inbound frame body (the full L bytes, opcode included).
    /// Returns an error only when `body` is shorter than the minimum for
    /// its recognised opcode; callers are expected to have already
    /// enforced the MAXBUF length limit on the frame as a whole.
    pub fn decode(body: &[u8]) -> Result<ServerMessage> {
        if body.len() < 4 {
            return Err(PlayerError::Other(anyhow::anyhow!(
                "frame shorter than opcode"
            )));
        }
        let opcode = [body[0], body[1], body[2], body[3]];
        let rest = &body[4..];

        Ok(match &opcode {
            b"strm" => ServerMessage::Strm(decode_strm(rest)?),
            b"cont" => ServerMessage::Cont(decode_cont(rest)?),
            b"codc" => ServerMessage::Codc(decode_track_params(rest)?),
            b"aude" => {
                if rest.len() < 2 {
                    return Err(PlayerError::Other(anyhow::anyhow!("short aude")));
                }
                ServerMessage::Aude {
                    spdif: rest[0] != 0,
                    dac: rest[1] != 0,
                }
            }
            b"audg" => {
                if rest.len() < 9 {
                    return Err(PlayerError::Other(anyhow::anyhow!("short audg")));
                }
                ServerMessage::Audg {
                    old_gain_l: read_u32(&rest[0..4]),
                    old_gain_r: read_u32(&rest[4..8]),
                    adjust: rest[8] != 0,
                }
            }
            b"setd" => {
                if rest.is_empty() {
                    return Err(PlayerError::Other(anyhow::anyhow!("short setd")));
                }
                ServerMessage::Setd {
                    id: rest[0],
                    data: rest[1..].to_vec(),
                }
            }
            b"serv" => {
                if rest.len() < 4 {
                    return Err(PlayerError::Other(anyhow::anyhow!("short serv")));
                }
                let ip = Ipv4Addr::from(read_u32(&rest[0..4]));
                let sync_group_id = if rest.len() - 4 == 10 {
                    let mut buf = [0u8; 10];
                    buf.copy_from_slice(&rest[4..14]);
                    Some(buf)
                } else {
                    None
                };
                ServerMessage::Serv { ip, sync_group_id }
            }
            b"vers" => ServerMessage::Vers(String::from_utf8_lossy(rest).trim_end_matches('\0').to_string()),
            b"ledc" => ServerMessage::Ledc(rest.to_vec()),
            _ => ServerMessage::Unknown {
                opcode,
                body: rest.to_vec(),
            },
        })
    }

    pub fn opcode_str(&self) -> &'static str {
        match self {
            ServerMessage::Strm(_) => "strm",
            ServerMessage::Cont(_) => "cont",
            ServerMessage::Codc(_) => "codc",
            ServerMessage::Aude { .. } => "aude",
            ServerMessage::Audg { .. } => "audg",
            ServerMessage::Setd { .. } => "setd",
            ServerMessage::Serv { .. } => "serv",
            ServerMessage::Vers(_) => "vers",
            ServerMessage::Ledc(_) => "ledc",
            ServerMessage::Unknown { .. } => "????",
        }
    }
}

fn decode_track_params(rest: &[u8]) -> Result<TrackParams> {
    if rest.len() < 5 {
        return Err(PlayerError::Other(anyhow::anyhow!("short codc/format block")));
    }
    Ok(TrackParams {
        format: rest[0],
        pcm_sample_rate: rest[1],
        pcm_sample_size: rest[2],
        pcm_channels: rest[3],
        pcm_endianness: rest[4],
    })
}

fn decode_cont(rest: &[u8]) -> Result<ContPacket> {
    if rest.len() < 5 {
        return Err(PlayerError::Other(anyhow::anyhow!("short cont")));
    }
    Ok(ContPacket {
        metaint: read_u32(&rest[0..4]),
        loop_flag: rest[4],
    })
}

fn decode_strm(rest: &[u8]) -> Result<StrmPacket> {
    // rest here excludes the 4-byte opcode already stripped by the caller,
    // so the fixed header is STRM_HEADER_LEN - 4 bytes.
    const FIXED: usize = STRM_HEADER_LEN - 4;
    if rest.len() < FIXED {
        return Err(PlayerError::Other(anyhow::anyhow!("short strm header")));
    }
    let command = StrmCommand::from(rest[0]);
    let autostart = rest[1];
    let params = TrackParams {
        format: rest[2],
        pcm_sample_rate: rest[3],
        pcm_sample_size: rest[4],
        pcm_channels: rest[5],
        pcm_endianness: rest[6],
    };
    let threshold_kb = rest[7];
    let fade_mode = rest[8];
    let fade_secs = rest[9];
    let replay_gain = read_u32(&rest[10..14]);
    let server_port = read_u16(&rest[14..16]);
    let server_ip = read_u32(&rest[16..20]);
    let http_request = rest[FIXED..].to_vec();

    Ok(StrmPacket {
        command,
        autostart,
        params,
        threshold_kb,
        fade_mode,
        fade_secs,
        replay_gain,
        server_port,
        server_ip,
        http_request,
    })
}

/// STAT event code, one per STMx class (spec.md glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatEvent {
    Tick,
    Started,
    DecodeDone,
    Underrun,
    Overrun,
    BufferLow,
    NoCodec,
    Flushed,
    Paused,
    Resumed,
    Connect,
}

impl StatEvent {
    fn as_bytes(self) -> [u8; 4] {
        match self {
            StatEvent::Tick => *b"STMt",
            StatEvent::Started => *b"STMs",
            StatEvent::DecodeDone => *b"STMd",
            StatEvent::Underrun => *b"STMu",
            StatEvent::Overrun => *b"STMo",
            StatEvent::BufferLow => *b"STMl",
            StatEvent::NoCodec => *b"STMn",
            StatEvent::Flushed => *b"STMf",
            StatEvent::Paused => *b"STMp",
            StatEvent::Resumed => *b"STMr",
            StatEvent::Connect => *b"STMc",
        }
    }
}

/// The fields of an outbound STAT frame (spec.md §4.1).
#[derive(Debug, Clone, Default)]
pub struct StatFields {
    pub num_crlf: u8,
    pub mas_initialized: u8,
    pub mas_mode: u8,
    pub stream_buffer_fullness: u32,
    pub stream_buffer_size: u32,
    pub bytes_received: u64,
    pub jiffies: u32,
    pub output_buffer_size: u32,
    pub output_buffer_fullness: u32,
    pub elapsed_seconds: u32,
    pub elapsed_milliseconds: u32,
    pub server_timestamp: u32,
    pub error_code: u16,
}

#[derive(Debug, Clone)]
pub enum ClientMessage {
    Helo {
        reconnect: bool,
        mac: [u8; 6],
        bytes_received: u64,
        capabilities: String,
    },
    Stat {
        event: StatEvent,
        fields: StatFields,
    },
    Dsco {
        reason: u8,
    },
    Resp(Vec<u8>),
    Meta(Vec<u8>),
    SetdName(String),
}

fn frame(opcode: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + body.len());
    out.extend_from_slice(opcode);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

impl ClientMessage {
    /// Encode into a complete outbound frame: 4-byte opcode, 4-byte body
    /// length, body (spec.md §4.1 — never a 2-byte length prefix, that's
    /// only used inbound).
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ClientMessage::Helo {
                reconnect,
                mac,
                bytes_received,
                capabilities,
            } => {
                let mut body = Vec::with_capacity(36 + capabilities.len());
                body.push(12u8); // deviceid: squeezeplay
                body.push(0u8); // revision
                body.extend_from_slice(mac);
                body.extend_from_slice(&[0u8; 16]); // uuid, unused
                let wlan_channellist: u16 = if *reconnect { 0x4000 } else { 0x0000 };
                body.extend_from_slice(&wlan_channellist.to_be_bytes());
                body.extend_from_slice(&bytes_received.to_be_bytes());
                body.extend_from_slice(&[0u8; 2]); // language, unused
                body.extend_from_slice(capabilities.as_bytes());
                frame(b"HELO", &body)
            }
            ClientMessage::Stat { event, fields } => {
                let mut body = Vec::with_capacity(52);
                body.extend_from_slice(&event.as_bytes());
                body.push(fields.num_crlf);
                body.push(fields.mas_initialized);
                body.push(fields.mas_mode);
                body.push(0); // pad to align the following u32s
                body.extend_from_slice(&fields.stream_buffer_fullness.to_be_bytes());
                body.extend_from_slice(&fields.stream_buffer_size.to_be_bytes());
                body.extend_from_slice(&fields.bytes_received.to_be_bytes());
                body.extend_from_slice(&0xffffu16.to_be_bytes()); // signal_strength
                body.extend_from_slice(&fields.jiffies.to_be_bytes());
                body.extend_from_slice(&fields.output_buffer_size.to_be_bytes());
                body.extend_from_slice(&fields.output_buffer_fullness.to_be_bytes());
                body.extend_from_slice(&fields.elapsed_seconds.to_be_bytes());
                body.extend_from_slice(&0u16.to_be_bytes()); // voltage, unused
                body.extend_from_slice(&fields.elapsed_milliseconds.to_be_bytes());
                body.extend_from_slice(&fields.server_timestamp.to_be_bytes()); // echoed opaque
                body.extend_from_slice(&fields.error_code.to_be_bytes());
                frame(b"STAT", &body)
            }
            ClientMessage::Dsco { reason } => frame(b"DSCO", &[*reason]),
            ClientMessage::Resp(headers) => frame(b"RESP", headers),
            ClientMessage::Meta(meta) => frame(b"META", meta),
            ClientMessage::SetdName(name) => {
                let mut body = Vec::with_capacity(1 + name.len() + 1);
                body.push(0u8); // id 0: player name
                body.extend_from_slice(name.as_bytes());
                body.push(0u8);
                frame(b"SETD", &body)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helo_round_trips_length_and_mac() {
        let msg = ClientMessage::Helo {
            reconnect: true,
            mac: [0x00, 0x11, 0x22, 0x33, 0x44, 0x55],
            bytes_received: 0x1122_3344_5566_7788,
            capabilities: "Model=squeezelite".to_string(),
        };
        let bytes = msg.encode();
        assert_eq!(&bytes[0..4], b"HELO");
        let len = read_u32(&bytes[4..8]) as usize;
        assert_eq!(bytes.len(), 8 + len);
        assert_eq!(bytes[8], 12); // deviceid
        assert_eq!(bytes[9], 0); // revision
        assert_eq!(&bytes[10..16], &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let wlan = read_u16(&bytes[32..34]);
        assert_eq!(wlan, 0x4000);
        let received = read_u64(&bytes[34..42]);
        assert_eq!(received, 0x1122_3344_5566_7788);
        assert!(bytes.ends_with(b"Model=squeezelite"));
    }

    #[test]
    fn stat_frame_has_echoed_timestamp() {
        let mut fields = StatFields::default();
        fields.server_timestamp = 0xdead_beef;
        fields.elapsed_milliseconds = 12345;
        let msg = ClientMessage::Stat {
            event: StatEvent::Tick,
            fields,
        };
        let bytes = msg.encode();
        assert_eq!(&bytes[0..4], b"STAT");
        assert_eq!(&bytes[8..12], b"STMt");
        let body = &bytes[8..];
        let ts = read_u32(&body[body.len() - 6..body.len() - 2]);
        assert_eq!(ts, 0xdead_beef);
    }

    #[test]
    fn strm_start_decodes_fixed_header_and_trailing_request() {
        let mut body = vec![];
        body.extend_from_slice(b"strm");
        body.push(b's'); // command
        body.push(b'1'); // autostart
        body.push(b'm'); // format
        body.push(b'3'); // rate
        body.push(b'1'); // size
        body.push(b'2'); // channels
        body.push(b'?'); // endianness
        body.push(10); // threshold KB
        body.push(b'0'); // fade_mode
        body.push(0); // fade_secs
        body.extend_from_slice(&0u32.to_be_bytes()); // replay_gain
        body.extend_from_slice(&3483u16.to_be_bytes()); // server_port
        body.extend_from_slice(&0u32.to_be_bytes()); // server_ip (0 = peer)
        body.extend_from_slice(b"GET /stream HTTP/1.0\r\n\r\n");

        let msg = ServerMessage::decode(&body).unwrap();
        match msg {
            ServerMessage::Strm(strm) => {
                assert_eq!(strm.command, StrmCommand::Start);
                assert_eq!(strm.autostart, b'1');
                assert_eq!(strm.params.format, b'm');
                assert_eq!(strm.server_port, 3483);
                assert_eq!(strm.http_request, b"GET /stream HTTP/1.0\r\n\r\n");
            }
            _ => panic!("expected strm"),
        }
    }

    #[test]
    fn serv_with_sync_payload_parses_sync_group() {
        let mut body = vec![];
        body.extend_from_slice(b"serv");
        body.extend_from_slice(&Ipv4Addr::new(192, 168, 1, 20).octets());
        body.extend_from_slice(b"ABCDEFGHIJ");
        match ServerMessage::decode(&body).unwrap() {
            ServerMessage::Serv { ip, sync_group_id } => {
                assert_eq!(ip, Ipv4Addr::new(192, 168, 1, 20));
                assert_eq!(sync_group_id.unwrap(), *b"ABCDEFGHIJ");
            }
            _ => panic!("expected serv"),
        }
    }

    #[test]
    fn serv_without_sync_payload_clears_sync_group() {
        let mut body = vec![];
        body.extend_from_slice(b"serv");
        body.extend_from_slice(&Ipv4Addr::new(192, 168, 1, 20).octets());
        match ServerMessage::decode(&body).unwrap() {
            ServerMessage::Serv { sync_group_id, .. } => assert!(sync_group_id.is_none()),
            _ => panic!("expected serv"),
        }
    }

    #[test]
    fn unknown_opcode_is_logged_not_fatal() {
        let mut body = vec![];
        body.extend_from_slice(b"zzzz");
        body.extend_from_slice(b"whatever");
        match ServerMessage::decode(&body).unwrap() {
            ServerMessage::Unknown { opcode, body } => {
                assert_eq!(&opcode, b"zzzz");
                assert_eq!(body, b"whatever");
            }
            _ => panic!("expected unknown"),
        }
    }
}
