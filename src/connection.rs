//! Connection manager (C3): discover-or-dial, HELO handshake, and the
//! reconnect/rediscover policy around one player's lifetime (spec.md
//! §4.3, §7).

use crossbeam::channel::Receiver;
use std::net::{SocketAddrV4, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::callback::MediaRenderer;
use crate::capabilities::fixed_capability;
use crate::capabilities::full_capability_blob;
use crate::config::PlayerConfig;
use crate::discovery::{self, DiscoveredServer};
use crate::error::{PlayerError, Result};
use crate::outbound;
use crate::player;
use crate::state::{PlayerContext, PlayerEvent, PlayerStatus};
use crate::wire::{ClientMessage, SLIM_PORT};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_DELAY: Duration = Duration::from_secs(5);
const POST_DISCONNECT_DWELL: Duration = Duration::from_millis(100);
const FAILURES_BEFORE_REDISCOVER: u32 = 5;

fn sleep_interruptibly(duration: Duration, running: &AtomicBool) {
    let step = Duration::from_millis(200);
    let mut remaining = duration;
    while remaining > Duration::ZERO && running.load(Ordering::Acquire) {
        let this_step = step.min(remaining);
        std::thread::sleep(this_step);
        remaining = remaining.saturating_sub(this_step);
    }
}

fn connect_with_timeout(addr: SocketAddrV4) -> Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&std::net::SocketAddr::V4(addr), CONNECT_TIMEOUT)
        .map_err(|_| PlayerError::ConnectTimeout)?;
    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// Sends the HELO handshake (spec.md §4.1, §12): base + fixed + variable
/// capability blob, `reconnect` set once this is not the player's first
/// connection since process start.
fn send_helo(
    stream: &mut TcpStream,
    config: &PlayerConfig,
    ctx: &PlayerContext,
    reconnect: bool,
) -> Result<()> {
    let capabilities = full_capability_blob(&ctx.fixed_cap, &ctx.var_cap);
    let msg = ClientMessage::Helo {
        reconnect,
        mac: config.mac,
        bytes_received: ctx.stream.bytes_received,
        capabilities,
    };
    outbound::write_frame(stream, &msg.encode())
}

fn resolve_target(config: &PlayerConfig, running: &AtomicBool) -> Option<DiscoveredServer> {
    match config.fixed_server {
        Some(ip) => Some(DiscoveredServer {
            addr: SocketAddrV4::new(ip, SLIM_PORT),
            cli_port: 0,
            server_version: String::new(),
        }),
        None => discovery::discover(None, running).ok(),
    }
}

/// Runs the full connect/reconnect/rediscover policy for as long as
/// `running` stays true, blocking the calling thread. Each successful
/// connection is handed to [`player::drive_connection`], which owns the
/// per-connection state machine and returns why it ended.
pub fn run(
    config: PlayerConfig,
    renderer: Arc<dyn MediaRenderer>,
    events: Receiver<PlayerEvent>,
    running: Arc<AtomicBool>,
    status: Arc<Mutex<PlayerStatus>>,
) {
    let mut ctx = PlayerContext::new(config.mac, config.name.clone());
    ctx.fixed_cap = fixed_capability(config.max_sample_rate, &config.codecs);

    let mut reconnect_flag = false;
    let mut pending_target: Option<DiscoveredServer> = None;

    while running.load(Ordering::Acquire) {
        let target = match pending_target.take() {
            Some(t) => t,
            None => match resolve_target(&config, running.as_ref()) {
                Some(t) => t,
                None => break,
            },
        };

        ctx.server_ip = *target.addr.ip();
        ctx.server_port = target.addr.port();
        ctx.cli_port = target.cli_port;

        let mut failures = 0u32;

        while running.load(Ordering::Acquire) {
            log::info!("connecting to {}", target.addr);
            let stream = match connect_with_timeout(target.addr) {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("connect to {} failed: {e}", target.addr);
                    failures += 1;
                    if failures >= FAILURES_BEFORE_REDISCOVER && config.fixed_server.is_none() {
                        log::info!("giving up on {}, rediscovering", target.addr);
                        break;
                    }
                    sleep_interruptibly(RETRY_DELAY, running.as_ref());
                    continue;
                }
            };
            failures = 0;

            let mut read_stream = match stream.try_clone() {
                Ok(s) => s,
                Err(e) => {
                    log::error!("failed to clone socket: {e}");
                    sleep_interruptibly(RETRY_DELAY, running.as_ref());
                    continue;
                }
            };
            let mut write_stream = stream;

            if let Err(e) = send_helo(&mut write_stream, &config, &ctx, reconnect_flag) {
                log::warn!("HELO failed: {e}");
                sleep_interruptibly(RETRY_DELAY, running.as_ref());
                continue;
            }
            reconnect_flag = true;

            let outcome = player::drive_connection(
                &mut read_stream,
                &mut write_stream,
                &config,
                renderer.as_ref(),
                &mut ctx,
                &events,
                running.as_ref(),
                status.as_ref(),
            );

            match outcome {
                Ok(_) => {
                    if let Some(new_ip) = ctx.new_server.take() {
                        log::info!("server switch to {new_ip}, rediscovering");
                        ctx.var_cap = ctx.new_server_cap.take().unwrap_or_default();
                        match discovery::discover(Some(new_ip), running.as_ref()) {
                            Ok(discovered) => pending_target = Some(discovered),
                            Err(e) => {
                                log::warn!("rediscovery of {new_ip} failed: {e}");
                            }
                        }
                        break;
                    }
                    std::thread::sleep(POST_DISCONNECT_DWELL);
                    continue;
                }
                Err(e) => {
                    log::warn!("connection to {} lost: {e}", target.addr);
                    std::thread::sleep(POST_DISCONNECT_DWELL);
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_interruptibly_returns_promptly_when_running_goes_false() {
        let running = AtomicBool::new(false);
        let start = std::time::Instant::now();
        sleep_interruptibly(Duration::from_secs(10), &running);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
