//! Track preparer (C6): negotiates codec/mimetype/sample format per new
//! track (spec.md §4.6), driven by every `strm s` with a known format and
//! by any subsequent `codc` resolving a deferred one.

use crate::callback::{MediaRenderer, TrackInfo};
use crate::config::{L24Format, PlayerConfig};
use crate::state::{EncodeMode, EncodeParams, PlayerContext};
use crate::wire::TrackParams;

const PCM_SAMPLE_SIZES: [u8; 4] = [8, 16, 24, 32];
const PCM_SAMPLE_RATES: [u32; 15] = [
    11025, 22050, 32000, 44100, 48000, 8000, 12000, 16000, 24000, 96000, 88200, 176400, 192000,
    352800, 384000,
];
const PCM_CHANNELS: [u8; 2] = [1, 2];

#[derive(Debug, Clone, Copy, Default)]
pub struct DecodedParams {
    pub sample_size: u8,
    pub sample_rate: u32,
    pub channels: u8,
    pub endianness: u8,
}

/// Decodes the protocol codes from `strm s` / `codc` (spec.md §4.6).
/// `max_sample_rate` clamps an over-reported rate, logging a warning, as
/// the original does.
pub fn decode_pcm_params(format: u8, params: TrackParams, max_sample_rate: u32) -> DecodedParams {
    let sample_size = if format == b'a' {
        // ALAC: the raw byte is used directly.
        params.pcm_sample_size
    } else if params.pcm_sample_size == b'?' {
        0
    } else {
        let idx = (params.pcm_sample_size - b'0') as usize;
        PCM_SAMPLE_SIZES.get(idx).copied().unwrap_or(0)
    };

    let mut sample_rate = if params.pcm_sample_rate == b'?' {
        0
    } else {
        let idx = (params.pcm_sample_rate - b'0') as usize;
        PCM_SAMPLE_RATES.get(idx).copied().unwrap_or(0)
    };

    if sample_rate > max_sample_rate {
        log::warn!(
            "sample rate {sample_rate} error suspected, forcing to {max_sample_rate}"
        );
        sample_rate = max_sample_rate;
    }

    let channels = if params.pcm_channels == b'?' {
        0
    } else {
        let idx = (params.pcm_channels - b'1') as usize;
        PCM_CHANNELS.get(idx).copied().unwrap_or(0)
    };

    let endianness = if params.pcm_endianness == b'?' {
        0xff
    } else {
        params.pcm_endianness - b'0'
    };

    DecodedParams {
        sample_size,
        sample_rate,
        channels,
        endianness,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ModeModifiers {
    /// Target re-encode sample rate; negative means "cap at abs(N)".
    pub target_rate: i32,
    pub target_size: u8,
    pub flac_level: u8,
    pub mp3_bitrate: u16,
    pub flow: bool,
}

impl Default for ModeModifiers {
    fn default() -> Self {
        ModeModifiers {
            target_rate: 0,
            target_size: 0,
            flac_level: 0,
            mp3_bitrate: 128,
            flow: false,
        }
    }
}

/// Processing-mode selection from the config `mode` string (spec.md §4.6).
pub fn select_encode_mode(mode: &str) -> EncodeMode {
    let lower = mode.to_ascii_lowercase();
    if lower.contains("pcm") {
        EncodeMode::Pcm
    } else if lower.contains("flc") {
        EncodeMode::Flac
    } else if lower.contains("mp3") {
        EncodeMode::Mp3
    } else {
        EncodeMode::Thru
    }
}

fn parse_int_after(haystack: &str, tag: &str) -> Option<i64> {
    let idx = haystack.find(tag)?;
    let rest = &haystack[idx + tag.len()..];
    let digits: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    digits.parse().ok()
}

pub fn parse_mode_modifiers(mode: &str) -> ModeModifiers {
    let lower = mode.to_ascii_lowercase();
    let mut m = ModeModifiers::default();

    if let Some(r) = parse_int_after(&lower, "r:") {
        m.target_rate = r as i32;
    }
    if let Some(s) = parse_int_after(&lower, "s:") {
        m.target_size = s as u8;
    }
    if let Some(level) = parse_int_after(&lower, "flac:") {
        m.flac_level = if (0..=9).contains(&level) { level as u8 } else { 0 };
    }
    if let Some(bitrate) = parse_int_after(&lower, "mp3:") {
        m.mp3_bitrate = (bitrate.clamp(0, 320)) as u16;
    } else {
        m.mp3_bitrate = 128;
    }
    m.flow = lower.contains("flow");

    m
}

/// Picks the first mimetype in `mimetypes` compatible with `codec`,
/// mirroring `find_mimetype`/`find_pcm_mimetype` (spec.md §4.6). For PCM,
/// 24-bit may be truncated to 16 when `l24_format` is `Trunc16`, and a
/// chosen `audio/L*` mimetype is rewritten to `"*"` (generic) once a
/// source-format match has been found rather than a fixed one.
pub fn resolve_mimetype(
    codec: u8,
    encode: &EncodeParams,
    l24_format: L24Format,
    mimetypes: &[String],
    raw_audio_format: &str,
) -> Option<(String, u8)> {
    match (codec, encode.mode) {
        (b'p', EncodeMode::Pcm) | (_, EncodeMode::Thru) if codec == b'p' => {
            let truncate = l24_format == L24Format::Trunc16 && encode.sample_size == 24;
            let effective_size = if truncate { 16 } else { encode.sample_size };
            let prefix = format!("audio/L{effective_size}");
            if let Some(found) = mimetypes.iter().find(|m| m.starts_with("audio/L")) {
                let _ = found;
                Some(("*".to_string(), b'p'))
            } else if raw_audio_format.contains("wav") || raw_audio_format.contains("aif") {
                Some((prefix, b'p'))
            } else {
                None
            }
        }
        (b'f', EncodeMode::Thru) => mimetypes
            .iter()
            .find(|m| m.contains("flac"))
            .map(|m| (m.clone(), b'c')),
        (_, EncodeMode::Thru) => mimetypes
            .iter()
            .find(|m| !m.starts_with("audio/L"))
            .map(|m| (m.clone(), b'*')),
        (_, EncodeMode::Pcm) => {
            let truncate = l24_format == L24Format::Trunc16 && encode.sample_size == 24;
            let effective_size = if truncate { 16 } else { encode.sample_size };
            Some((format!("audio/L{effective_size}"), b'*'))
        }
        (_, EncodeMode::Flac) => mimetypes
            .iter()
            .find(|m| m.contains("flac"))
            .map(|m| (m.clone(), b'*')),
        (_, EncodeMode::Mp3) => mimetypes
            .iter()
            .find(|m| m.contains("mpeg"))
            .map(|m| (m.clone(), b'*')),
    }
}

pub fn mimetype_to_ext(mimetype: &str) -> &'static str {
    if mimetype.contains("mpeg") {
        "mp3"
    } else if mimetype.contains("flac") {
        "flc"
    } else if mimetype.starts_with("audio/L") || mimetype == "*" {
        "pcm"
    } else {
        "dat"
    }
}

/// Negotiates codec/mimetype/sample format and, on success, hands the
/// host a `SET_TRACK` callback (spec.md §4.6). Returns `false` when no
/// codec/mimetype combination could be found, which the caller (`strm s`
/// / `codc` handlers) turns into a `STMn`.
pub fn prepare_track(
    ctx: &mut PlayerContext,
    config: &PlayerConfig,
    renderer: &dyn MediaRenderer,
    format: u8,
    decoded: DecodedParams,
) -> bool {
    ctx.output.index += 1;
    let offset = match ctx.render.index {
        Some(render_index) => ctx.output.index as i64 - render_index as i64,
        None => 0,
    };
    ctx.outputbuf.resize(config.outputbuf_size);

    let metadata = renderer.metadata(offset);

    ctx.output.completed = false;
    ctx.output.duration = metadata.duration_ms.unwrap_or(0);
    ctx.output.remote = metadata.remote;
    ctx.output.sample_size = decoded.sample_size;
    ctx.output.sample_rate = decoded.sample_rate;
    ctx.output.channels = decoded.channels;
    ctx.output.in_endian = decoded.endianness;
    ctx.output.codec = format;

    if ctx.output.encode.flow {
        // Flow mode: parameters are already known from a previous track;
        // the codec is opened by the host as part of accepting set_track.
    } else {
        ctx.output.encode.mode = select_encode_mode(&config.mode);
        let modifiers = parse_mode_modifiers(&config.mode);

        ctx.output.encode.channels = 0;
        ctx.output.encode.sample_size = modifiers.target_size;

        if modifiers.flow && ctx.output.encode.mode != EncodeMode::Thru {
            ctx.output.encode.sample_rate = if modifiers.target_rate > 0 {
                modifiers.target_rate as u32
            } else {
                44100
            };
            if ctx.output.encode.sample_size == 0 {
                ctx.output.encode.sample_size = 16;
            }
            ctx.output.encode.channels = 2;
            ctx.output.encode.flow = true;
        } else {
            let supported_rate = if modifiers.target_rate > 0 {
                modifiers.target_rate
            } else if modifiers.target_rate < 0 {
                if ctx.output.sample_rate > 0 {
                    (ctx.output.sample_rate as i32).min(modifiers.target_rate.abs())
                } else {
                    modifiers.target_rate
                }
            } else {
                ctx.output.sample_rate as i32
            };
            ctx.output.encode.sample_rate = if supported_rate > 0 {
                supported_rate as u32
            } else {
                0
            };
        }

        if ctx.output.encode.mode == EncodeMode::Flac {
            if ctx.output.sample_size > 24 {
                ctx.output.encode.sample_size = 24;
            }
            ctx.output.encode.level = modifiers.flac_level;
        } else if ctx.output.encode.mode == EncodeMode::Mp3 {
            ctx.output.encode.sample_size = 16;
            ctx.output.encode.level = modifiers.mp3_bitrate.min(320) as u8;
        }
    }

    let mimetype = resolve_mimetype(
        format,
        &ctx.output.encode,
        config.l24_format,
        &config.mimetypes,
        &config.raw_audio_format,
    );

    let Some((mimetype, resolved_codec)) = mimetype else {
        return false;
    };

    ctx.output.mimetype = mimetype.clone();
    ctx.output.codec = resolved_codec;

    let uri = format!(
        "http://{}:{}/stream/{}.{}",
        config.sq_ip,
        config.sq_port,
        ctx.output.index,
        mimetype_to_ext(&mimetype)
    );

    let track_info = TrackInfo {
        mimetype,
        uri,
        metadata,
    };

    log::info!(
        "codec:{} ch:{} s:{} r:{}",
        ctx.output.codec as char,
        ctx.output.channels,
        ctx.output.sample_size,
        ctx.output.sample_rate
    );

    renderer.set_track(&track_info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::test_support::RecordingRenderer;

    #[test]
    fn decode_pcm_params_reads_table_indices() {
        let params = TrackParams {
            format: b'p',
            pcm_sample_rate: b'3',
            pcm_sample_size: b'1',
            pcm_channels: b'2',
            pcm_endianness: b'0',
        };
        let decoded = decode_pcm_params(b'p', params, 384000);
        assert_eq!(decoded.sample_rate, 44100);
        assert_eq!(decoded.sample_size, 16);
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.endianness, 0);
    }

    #[test]
    fn decode_pcm_params_clamps_to_configured_maximum() {
        let params = TrackParams {
            format: b'p',
            pcm_sample_rate: b'9', // 384000
            pcm_sample_size: b'?',
            pcm_channels: b'?',
            pcm_endianness: b'?',
        };
        let decoded = decode_pcm_params(b'p', params, 48000);
        assert_eq!(decoded.sample_rate, 48000);
        assert_eq!(decoded.endianness, 0xff);
    }

    #[test]
    fn alac_uses_raw_sample_size_byte() {
        let params = TrackParams {
            format: b'a',
            pcm_sample_rate: b'3',
            pcm_sample_size: 24,
            pcm_channels: b'2',
            pcm_endianness: b'?',
        };
        let decoded = decode_pcm_params(b'a', params, 384000);
        assert_eq!(decoded.sample_size, 24);
    }

    #[test]
    fn select_encode_mode_matches_substrings() {
        assert_eq!(select_encode_mode("flc"), EncodeMode::Flac);
        assert_eq!(select_encode_mode("pcm,r:44100"), EncodeMode::Pcm);
        assert_eq!(select_encode_mode("mp3:192"), EncodeMode::Mp3);
        assert_eq!(select_encode_mode("thru"), EncodeMode::Thru);
        assert_eq!(select_encode_mode(""), EncodeMode::Thru);
    }

    #[test]
    fn parse_mode_modifiers_reads_all_tags() {
        let m = parse_mode_modifiers("flc,flac:5,r:-48000,s:16,flow");
        assert_eq!(m.flac_level, 5);
        assert_eq!(m.target_rate, -48000);
        assert_eq!(m.target_size, 16);
        assert!(m.flow);
    }

    #[test]
    fn mp3_bitrate_defaults_to_128_and_clamps_to_320() {
        assert_eq!(parse_mode_modifiers("mp3").mp3_bitrate, 128);
        assert_eq!(parse_mode_modifiers("mp3:999").mp3_bitrate, 320);
    }

    #[test]
    fn prepare_track_increments_output_index_and_calls_set_track() {
        let mut ctx = PlayerContext::new([0; 6], "test".into());
        let mut config = PlayerConfig::default();
        config.mode = "thru".into();
        config.mimetypes = vec!["audio/mpeg".into()];
        let renderer = RecordingRenderer::default();

        let decoded = decode_pcm_params(
            b'm',
            TrackParams {
                format: b'm',
                pcm_sample_rate: b'3',
                pcm_sample_size: b'1',
                pcm_channels: b'2',
                pcm_endianness: b'?',
            },
            config.max_sample_rate,
        );

        let ok = prepare_track(&mut ctx, &config, &renderer, b'm', decoded);
        assert!(ok);
        assert_eq!(ctx.output.index, 1);
        let calls = renderer.calls.lock().unwrap();
        assert!(calls.iter().any(|c| c.starts_with("set_track")));
    }

    #[test]
    fn prepare_track_fails_without_a_matching_mimetype() {
        let mut ctx = PlayerContext::new([0; 6], "test".into());
        let mut config = PlayerConfig::default();
        config.mode = "thru".into();
        config.mimetypes = vec![]; // nothing to match
        config.raw_audio_format = String::new();
        let renderer = RecordingRenderer::default();

        let decoded = decode_pcm_params(
            b'p',
            TrackParams {
                format: b'p',
                pcm_sample_rate: b'3',
                pcm_sample_size: b'1',
                pcm_channels: b'2',
                pcm_endianness: b'0',
            },
            config.max_sample_rate,
        );

        let ok = prepare_track(&mut ctx, &config, &renderer, b'p', decoded);
        assert!(!ok);
    }
}
