//! Outbound frame senders (spec.md §4.1): STAT/DSCO/RESP/META/SETD, shared
//! by the tick loop ([`crate::player`]) and the inbound dispatcher
//! ([`crate::dispatch`]).

use std::io::Write;
use std::net::TcpStream;
use std::time::Instant;

use crate::error::{PlayerError, Result};
use crate::state::PlayerContext;
use crate::wire::{ClientMessage, StatEvent, StatFields};

pub fn write_frame(stream: &mut TcpStream, bytes: &[u8]) -> Result<()> {
    stream.write_all(bytes).map_err(PlayerError::Io)
}

/// Sends a STAT frame. `server_timestamp` is echoed back verbatim in the
/// reply (spec.md §4.1: "kept in server format, never unpacked").
pub fn send_stat(
    stream: &mut TcpStream,
    ctx: &PlayerContext,
    connect_time: Instant,
    event: StatEvent,
    server_timestamp: u32,
) -> Result<()> {
    let fields = StatFields {
        num_crlf: 0,
        mas_initialized: 0,
        mas_mode: 0,
        stream_buffer_fullness: ctx.status.stream_full as u32,
        stream_buffer_size: ctx.status.stream_size as u32,
        bytes_received: ctx.status.stream_bytes,
        jiffies: connect_time.elapsed().as_millis() as u32,
        output_buffer_size: ctx.status.output_size as u32,
        output_buffer_fullness: ctx.status.output_full as u32,
        elapsed_seconds: ctx.status.ms_played / 1000,
        elapsed_milliseconds: ctx.status.ms_played,
        server_timestamp,
        error_code: 0,
    };

    if event != StatEvent::Tick {
        log::info!("STAT [{event:?}] msplayed {}", ctx.status.ms_played);
    }

    write_frame(stream, &ClientMessage::Stat { event, fields }.encode())
}

pub fn send_dsco(stream: &mut TcpStream, reason: u8) -> Result<()> {
    write_frame(stream, &ClientMessage::Dsco { reason }.encode())
}

pub fn send_resp(stream: &mut TcpStream, header: &[u8]) -> Result<()> {
    write_frame(stream, &ClientMessage::Resp(header.to_vec()).encode())
}

pub fn send_meta(stream: &mut TcpStream, meta: &[u8]) -> Result<()> {
    write_frame(stream, &ClientMessage::Meta(meta.to_vec()).encode())
}

pub fn send_setd_name(stream: &mut TcpStream, name: &str) -> Result<()> {
    write_frame(stream, &ClientMessage::SetdName(name.to_string()).encode())
}
