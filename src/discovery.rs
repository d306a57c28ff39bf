//! Alpaca server discovery: a 64-byte UDP broadcast probe, plus a
//! local-first TCP sweep because Windows won't loop UDP broadcasts back to
//! the sending host.

use serde::Deserialize;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, info, warn};

use crate::errors::{GatewayError, Result};

pub const DISCOVERY_PORT: u16 = 32227;
pub const DEFAULT_ALPACA_PORT: u16 = 11111;

const DISCOVERY_MESSAGE: &[u8] = b"alpacadiscovery";
const DISCOVERY_VERSION: u8 = b'1';

#[derive(Debug, Deserialize)]
struct DiscoveryReply {
    #[serde(rename = "AlpacaPort")]
    alpaca_port: u16,
}

/// The fixed 64-byte query: `alpacadiscovery`, the protocol version digit,
/// then zero padding.
fn discovery_frame() -> [u8; 64] {
    let mut frame = [0u8; 64];
    frame[..DISCOVERY_MESSAGE.len()].copy_from_slice(DISCOVERY_MESSAGE);
    frame[DISCOVERY_MESSAGE.len()] = DISCOVERY_VERSION;
    frame
}

/// The responder and our own broadcast share a port, so our frame comes
/// right back at us.
fn is_own_echo(payload: &[u8], frame: &[u8; 64]) -> bool {
    payload.len() == 64 && payload.starts_with(&frame[..=DISCOVERY_MESSAGE.len()])
}

/// Every local IPv4 interface address.
pub fn local_ipv4_addresses() -> Vec<Ipv4Addr> {
    default_net::get_interfaces()
        .iter()
        .flat_map(|interface| interface.ipv4.iter())
        .map(|net| net.addr)
        .collect()
}

/// Local IPv4 networks as (address, netmask) pairs.
pub fn local_ipv4_networks() -> Vec<(Ipv4Addr, Ipv4Addr)> {
    default_net::get_interfaces()
        .iter()
        .flat_map(|interface| interface.ipv4.iter())
        .map(|net| (net.addr, net.netmask))
        .collect()
}

pub(crate) fn bind_udp_socket(port: u16, broadcast: bool) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    if broadcast {
        socket.set_broadcast(true)?;
    }
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
    UdpSocket::from_std(socket.into())
}

/// Look for an Alpaca server on a local interface by trying a short TCP
/// connect to each address.  Returns the first address that accepts.
pub async fn find_local_server(port: u16) -> Option<Ipv4Addr> {
    info!("Looking for an Alpaca server locally on port {}...", port);
    for ip in local_ipv4_addresses() {
        let attempt = tokio::time::timeout(
            Duration::from_secs(1),
            TcpStream::connect(SocketAddr::from((ip, port))),
        )
        .await;
        match attempt {
            Ok(Ok(_)) => {
                info!("Found Alpaca on {}:{}", ip, port);
                return Some(ip);
            }
            _ => debug!("Alpaca is not running on {}:{}", ip, port),
        }
    }
    info!("No local Alpaca servers found");
    None
}

/// Broadcast the discovery frame and wait for a `{"AlpacaPort": …}` reply.
/// Each attempt gets a one-second read deadline.
pub async fn discover_server(tries: u32) -> Result<(Ipv4Addr, u16)> {
    let socket = bind_udp_socket(DISCOVERY_PORT, true)
        .map_err(|e| GatewayError::Discover(format!("unable to open discovery socket: {}", e)))?;

    let frame = discovery_frame();
    let broadcast = SocketAddr::from((Ipv4Addr::BROADCAST, DISCOVERY_PORT));
    let mut buf = [0u8; 1024];

    for attempt in 0..tries {
        debug!(attempt, "sending Alpaca discovery broadcast");
        socket
            .send_to(&frame, broadcast)
            .await
            .map_err(|e| GatewayError::Discover(format!("unable to send broadcast: {}", e)))?;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        loop {
            let Ok(received) = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await
            else {
                break; // deadline elapsed, try another broadcast
            };
            let (n, addr) = match received {
                Ok(result) => result,
                Err(e) => {
                    warn!("Failed to read discovery reply: {}", e);
                    break;
                }
            };

            let payload = &buf[..n];
            if is_own_echo(payload, &frame) {
                continue;
            }
            debug!("received {} bytes via discovery: {:?}", n, payload);

            match serde_json::from_slice::<DiscoveryReply>(payload) {
                Ok(reply) => {
                    if let IpAddr::V4(ip) = addr.ip() {
                        info!("Discovered Alpaca server on {}:{}", ip, reply.alpaca_port);
                        return Ok((ip, reply.alpaca_port));
                    }
                }
                Err(e) => {
                    warn!("Unable to decode discovery reply: {}", e);
                    break;
                }
            }
        }
    }
    Err(GatewayError::Discover(
        "no reply from an Alpaca server".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout() {
        let frame = discovery_frame();
        assert_eq!(frame.len(), 64);
        assert_eq!(&frame[..16], b"alpacadiscovery1");
        assert!(frame[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn own_echo_is_recognized() {
        let frame = discovery_frame();
        assert!(is_own_echo(&frame, &frame));
        // a reply is JSON, shorter than the 64-byte query
        assert!(!is_own_echo(br#"{"AlpacaPort":11111}"#, &frame));
        // same prefix but wrong length is not our echo
        assert!(!is_own_echo(b"alpacadiscovery1", &frame));
    }

    #[test]
    fn reply_decoding() {
        let reply: DiscoveryReply = serde_json::from_slice(br#"{"AlpacaPort": 11111}"#).unwrap();
        assert_eq!(reply.alpaca_port, 11111);
        assert!(serde_json::from_slice::<DiscoveryReply>(b"skyfi?").is_err());
    }
}
