use std::io;

/// Failure modes the protocol loop recognises by name, matching the
/// recovery paths in spec.md §7. Every one of these is handled by
/// returning to the outer reconnect loop (`connection::run`) — none of
/// them aborts the process.
#[derive(thiserror::Error, Debug)]
pub enum PlayerError {
    #[error("inbound frame of {len} bytes exceeds MAXBUF ({max})")]
    OversizeFrame { len: usize, max: usize },

    #[error("connection to server timed out")]
    ConnectTimeout,

    #[error("no message from server in {0:?}, connection presumed dead")]
    HeartbeatTimeout(std::time::Duration),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("discovery produced no response")]
    DiscoveryFailed,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
