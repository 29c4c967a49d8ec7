//! Server discovery (C2): UDP broadcast probe, TLV response parsing
//! (spec.md §4.2, §6).

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{PlayerError, Result};
use crate::wire::SLIM_PORT;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DiscoveredServer {
    pub addr: SocketAddrV4,
    pub cli_port: u16,
    pub server_version: String,
}

/// Sends `e` + "VERS\0JSON\0CLIP\0" to UDP/3483, broadcast unless
/// `fixed_ip` names a unicast target, and waits up to 5s per attempt.
/// Retries forever while `running` stays true.
pub fn discover(fixed_ip: Option<Ipv4Addr>, running: &AtomicBool) -> Result<DiscoveredServer> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.set_broadcast(true)?;
    socket.set_read_timeout(Some(DISCOVERY_TIMEOUT))?;

    let mut request = vec![b'e'];
    request.extend_from_slice(b"VERS\0JSON\0CLIP\0");

    let target = SocketAddrV4::new(fixed_ip.unwrap_or(Ipv4Addr::BROADCAST), SLIM_PORT);

    while running.load(Ordering::Acquire) {
        log::debug!("sending discovery request to {target}");
        socket.send_to(&request, target)?;

        let mut buf = [0u8; 128];
        match socket.recv_from(&mut buf) {
            Ok((n, peer)) => {
                if let std::net::SocketAddr::V4(peer) = peer {
                    let parsed = parse_discovery_response(&buf[..n]);
                    log::debug!("got response from {peer}");
                    return Ok(DiscoveredServer {
                        addr: peer,
                        cli_port: parsed.cli_port.unwrap_or(9090),
                        server_version: parsed.server_version.unwrap_or_default(),
                    });
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => return Err(PlayerError::Io(e)),
        }
    }

    Err(PlayerError::DiscoveryFailed)
}

#[derive(Debug, Default)]
struct ParsedResponse {
    server_version: Option<String>,
    cli_port: Option<u16>,
}

/// Each tag is followed by a single-byte length, then that many ASCII
/// chars (spec.md §6).
fn parse_discovery_response(buf: &[u8]) -> ParsedResponse {
    let mut out = ParsedResponse::default();
    out.server_version = find_tlv(buf, b"VERS");
    if let Some(port_str) = find_tlv(buf, b"JSON") {
        let _http_port: Option<u16> = port_str.parse().ok();
    }
    if let Some(port_str) = find_tlv(buf, b"CLIP") {
        out.cli_port = port_str.parse().ok();
    }
    out
}

fn find_tlv(buf: &[u8], tag: &[u8]) -> Option<String> {
    let pos = find_subslice(buf, tag)?;
    let len_pos = pos + tag.len();
    let len = *buf.get(len_pos)? as usize;
    let start = len_pos + 1;
    let end = start.checked_add(len)?;
    if end > buf.len() {
        return None;
    }
    Some(String::from_utf8_lossy(&buf[start..end]).to_string())
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_response(version: &str, json_port: &str, cli_port: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"VERS");
        buf.push(version.len() as u8);
        buf.extend_from_slice(version.as_bytes());
        buf.extend_from_slice(b"JSON");
        buf.push(json_port.len() as u8);
        buf.extend_from_slice(json_port.as_bytes());
        buf.extend_from_slice(b"CLIP");
        buf.push(cli_port.len() as u8);
        buf.extend_from_slice(cli_port.as_bytes());
        buf
    }

    #[test]
    fn parses_all_three_tags() {
        let buf = build_response("7.9.1", "9000", "9090");
        let parsed = parse_discovery_response(&buf);
        assert_eq!(parsed.server_version.as_deref(), Some("7.9.1"));
        assert_eq!(parsed.cli_port, Some(9090));
    }

    #[test]
    fn missing_tag_yields_none_without_panicking() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"VERS");
        buf.push(3);
        buf.extend_from_slice(b"7.9");
        let parsed = parse_discovery_response(&buf);
        assert_eq!(parsed.server_version.as_deref(), Some("7.9"));
        assert_eq!(parsed.cli_port, None);
    }

    #[test]
    fn truncated_length_byte_does_not_panic() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"CLIP");
        buf.push(250); // claims 250 bytes follow but none do
        let parsed = parse_discovery_response(&buf);
        assert_eq!(parsed.cli_port, None);
    }
}
