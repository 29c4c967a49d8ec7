//! A client-side implementation of the SlimProto control protocol used by
//! Lyrion/Logitech Media Server (spec.md §1).
//!
//! This crate owns the wire codec, server discovery, connection
//! management, and the player state machine (the "long-buffer
//! discipline": `STMd` is withheld until the current track has been
//! fully absorbed downstream). It does not decode audio, open an output
//! device, or fetch HTTP stream bodies — those live behind the
//! [`MediaRenderer`] trait the host implements.

pub mod buffer;
pub mod callback;
pub mod capabilities;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod outbound;
pub mod player;
pub mod state;
pub mod track;
pub mod wire;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Sender};

pub use callback::{MediaRenderer, TrackInfo, TrackMetadata};
pub use config::{L24Format, PlayerConfig};
pub use error::{PlayerError, Result};
pub use state::{PlayerEvent, PlayerStatus};

/// A running player. Owns the connection-manager thread for as long as
/// this handle (or a clone held elsewhere) is alive; dropping it, or
/// calling [`Player::close`], stops the thread and waits for it to exit.
pub struct Player {
    events_tx: Sender<PlayerEvent>,
    running: Arc<AtomicBool>,
    status: Arc<Mutex<PlayerStatus>>,
    join: Option<JoinHandle<()>>,
}

impl Player {
    /// Spawns the connection-manager thread (spec.md §14): discovery,
    /// HELO handshake, and the protocol state machine all run on it.
    /// `renderer` receives every playback callback for the life of the
    /// player.
    pub fn spawn(config: PlayerConfig, renderer: Arc<dyn MediaRenderer>) -> Player {
        let (events_tx, events_rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = Arc::clone(&running);
        let status = Arc::new(Mutex::new(PlayerStatus::default()));
        let status_thread = Arc::clone(&status);

        let join = std::thread::Builder::new()
            .name("slimproto".into())
            .spawn(move || {
                connection::run(config, renderer, events_rx, running_thread, status_thread)
            })
            .expect("failed to spawn slimproto thread");

        Player {
            events_tx,
            running,
            status,
            join: Some(join),
        }
    }

    /// Reports a fact from another actor — streamer, decoder, or
    /// renderer — into the protocol thread, which is the sole owner of
    /// player state (spec.md §13).
    pub fn report(&self, event: PlayerEvent) {
        self.events_tx.send(event).ok();
    }

    /// The STAT fields as of the most recently completed tick, for a
    /// host that wants to poll playback status from a thread other than
    /// the one driving `Player` (spec.md §13: "status snapshot published
    /// to outbound STAT").
    pub fn status(&self) -> PlayerStatus {
        self.status.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Signals the connection-manager thread to stop and blocks until it
    /// exits.
    pub fn close(mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(join) = self.join.take() {
            join.join().ok();
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(join) = self.join.take() {
            join.join().ok();
        }
    }
}
