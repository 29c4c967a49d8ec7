//! Player configuration (spec.md §11). Plain data the host assembles;
//! this crate does not parse a config file (spec.md §6: "Persisted
//! state: none at the core layer").

use std::net::Ipv4Addr;

/// How truncated 24-bit PCM is represented, mirroring the original's
/// `L24_format` (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum L24Format {
    #[default]
    Pad32,
    Trunc16,
}

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub name: String,
    pub mac: [u8; 6],
    /// `None` means autodiscover; `Some` pins a fixed server.
    pub fixed_server: Option<Ipv4Addr>,
    pub max_sample_rate: u32,
    /// Codecs this player claims support for, in capability-string order
    /// (e.g. `["pcm", "flc", "mp3"]`).
    pub codecs: Vec<String>,
    /// Processing mode string decoded by `track::select_encode_mode`
    /// (spec.md §4.6): `"thru"`, `"pcm"`, `"flc"`, `"mp3"`, with optional
    /// `r:N`, `s:N`, `flac:N`, `mp3:N`, `flow` modifiers.
    pub mode: String,
    pub send_icy: bool,
    pub l24_format: L24Format,
    pub outputbuf_size: usize,
    /// MIME types the host's media renderer declares support for, queried
    /// during track preparation (spec.md §4.6 `find_mimetype`).
    pub mimetypes: Vec<String>,
    pub raw_audio_format: String,
    pub stream_length: u32,
    pub sq_ip: Ipv4Addr,
    pub sq_port: u16,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            name: "slimcore".to_string(),
            mac: [0, 0, 0, 0, 0, 0],
            fixed_server: None,
            max_sample_rate: 192000,
            codecs: vec!["pcm".into(), "flc".into(), "mp3".into()],
            mode: "thru".to_string(),
            send_icy: false,
            l24_format: L24Format::default(),
            outputbuf_size: 2 * 1024 * 1024,
            mimetypes: vec!["audio/mpeg".into(), "audio/flac".into(), "audio/L16".into()],
            raw_audio_format: "wav".to_string(),
            stream_length: 0,
            sq_ip: Ipv4Addr::LOCALHOST,
            sq_port: 9000,
        }
    }
}
