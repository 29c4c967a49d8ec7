//! MR callback bridge (C7): the host-facing surface. Replaces the
//! original's single void-pointer `ctx_callback(ctx, action, cookie, param)`
//! with a trait carrying one strongly-typed method per action (REDESIGN
//! FLAGS, spec.md §13).
//!
//! All bridge invocations happen without any facet lock held — since this
//! crate gives the protocol thread sole ownership of `PlayerContext`
//! (§13), that invariant holds structurally: nothing else can be locked
//! while a `MediaRenderer` method runs.

use std::net::Ipv4Addr;

/// Track parameters handed to `set_track`, mirroring `struct track_param`
/// (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub mimetype: String,
    pub uri: String,
    pub metadata: TrackMetadata,
}

/// Metadata the host supplies per track; `duration`/`bitrate` of `None`
/// mean "unknown", matching the original's `0` sentinel but without the
/// ambiguity against a genuinely zero-length track.
#[derive(Debug, Clone, Default)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_ms: Option<u32>,
    pub bitrate: Option<u32>,
    pub remote: bool,
    pub sample_rate: Option<u32>,
    pub sample_size: Option<u8>,
}

/// The host-facing surface (spec.md §14). A `Player` holds one `Arc<dyn
/// MediaRenderer>` for its whole lifetime; every method may be called
/// from the protocol thread at any time after `Player::spawn`.
pub trait MediaRenderer: Send + Sync {
    fn on_off(&self, on: bool);
    fn volume(&self, gain: u16);
    fn play(&self);
    fn pause(&self);
    fn unpause(&self, at_jiffies: u32);
    fn stop(&self);
    fn set_name(&self, name: &str);
    fn set_server(&self, ip: Ipv4Addr);
    /// Returns `true` if the host accepted the track (spec.md §4.7).
    fn set_track(&self, track: &TrackInfo) -> bool;
    /// Metadata for the track at `offset` tracks ahead of the one
    /// currently rendering (spec.md §4.6: `offset = output.index -
    /// render.index`, used to look ahead when the server skips tracks).
    fn metadata(&self, offset: i64) -> TrackMetadata;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// A `MediaRenderer` that records every call for assertions, used by
    /// the state-machine integration tests.
    #[derive(Default)]
    pub struct RecordingRenderer {
        pub calls: Mutex<Vec<String>>,
    }

    impl MediaRenderer for RecordingRenderer {
        fn on_off(&self, on: bool) {
            self.calls.lock().unwrap().push(format!("on_off({on})"));
        }
        fn volume(&self, gain: u16) {
            self.calls.lock().unwrap().push(format!("volume({gain})"));
        }
        fn play(&self) {
            self.calls.lock().unwrap().push("play".into());
        }
        fn pause(&self) {
            self.calls.lock().unwrap().push("pause".into());
        }
        fn unpause(&self, at_jiffies: u32) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("unpause({at_jiffies})"));
        }
        fn stop(&self) {
            self.calls.lock().unwrap().push("stop".into());
        }
        fn set_name(&self, name: &str) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("set_name({name})"));
        }
        fn set_server(&self, ip: Ipv4Addr) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("set_server({ip})"));
        }
        fn set_track(&self, track: &TrackInfo) -> bool {
            self.calls
                .lock()
                .unwrap()
                .push(format!("set_track({})", track.uri));
            true
        }
        fn metadata(&self, _offset: i64) -> TrackMetadata {
            TrackMetadata::default()
        }
    }
}
