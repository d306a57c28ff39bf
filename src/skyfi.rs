//! SkyFi discovery responder.
//!
//! SkySafari-family clients find their WiFi bridge by broadcasting
//! `skyfi?` on UDP 4031; the bridge echoes the query with `?` swapped for
//! `@` and its own IPv4 appended.  Answering that probe makes the gateway
//! show up in their device pickers.

use std::net::{IpAddr, Ipv4Addr};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::discovery::{bind_udp_socket, local_ipv4_networks};

pub const SKYFI_PORT: u16 = 4031;

/// Listen for SkyFi discovery probes until cancelled.
pub async fn reply_discover(cancel: CancellationToken) {
    let socket = match bind_udp_socket(SKYFI_PORT, false) {
        Ok(socket) => socket,
        Err(e) => {
            error!("Unable to open SkyFi discovery listen socket: {}", e);
            return;
        }
    };
    info!("Starting SkyFi discovery service on UDP/{}", SKYFI_PORT);
    serve(socket, cancel).await;
}

async fn serve(socket: UdpSocket, cancel: CancellationToken) {
    let mut buf = [0u8; 1024];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("SkyFi discovery service stopping");
                return;
            }
            received = socket.recv_from(&mut buf) => {
                let (n, addr) = match received {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("Unable to read from SkyFi discovery socket: {}", e);
                        continue;
                    }
                };
                let IpAddr::V4(client) = addr.ip() else {
                    continue;
                };
                match handle_query(&buf[..n], client, &local_ipv4_networks()) {
                    Some(reply) => {
                        debug!("SkyFi reply to {}: {:?}", addr, reply);
                        if let Err(e) = socket.send_to(&reply, addr).await {
                            error!("Unable to send SkyFi discovery reply: {}", e);
                        }
                    }
                    None => warn!(
                        "Ignoring query of {} bytes from {}: {:?}",
                        n, addr, &buf[..n]
                    ),
                }
            }
        }
    }
}

/// Shape the reply for one probe, or `None` when the probe isn't SkyFi or
/// no local interface shares a network with the sender.
fn handle_query(
    query: &[u8],
    client: Ipv4Addr,
    networks: &[(Ipv4Addr, Ipv4Addr)],
) -> Option<Vec<u8>> {
    if !query.starts_with(b"skyfi") {
        return None;
    }
    let local_ip = find_ip_in_cidr(client, networks)?;

    let mut reply = query.to_vec();
    if reply.last() == Some(&b'?') {
        *reply.last_mut()? = b'@';
    }
    reply.extend_from_slice(local_ip.to_string().as_bytes());
    Some(reply)
}

/// Pick the local address on the same network as the client.
fn find_ip_in_cidr(client: Ipv4Addr, networks: &[(Ipv4Addr, Ipv4Addr)]) -> Option<Ipv4Addr> {
    for &(addr, netmask) in networks {
        let mask = u32::from(netmask);
        if u32::from(addr) & mask == u32::from(client) & mask {
            return Some(addr);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn networks() -> Vec<(Ipv4Addr, Ipv4Addr)> {
        vec![
            (
                Ipv4Addr::new(10, 1, 2, 3),
                Ipv4Addr::new(255, 255, 0, 0),
            ),
            (
                Ipv4Addr::new(192, 168, 1, 23),
                Ipv4Addr::new(255, 255, 255, 0),
            ),
        ]
    }

    #[test]
    fn query_gets_echo_with_local_ip() {
        let reply = handle_query(b"skyfi?", Ipv4Addr::new(192, 168, 1, 50), &networks());
        assert_eq!(reply.unwrap(), b"skyfi@192.168.1.23");
    }

    #[test]
    fn named_query_keeps_its_text() {
        let reply = handle_query(
            b"skyfi:MyScope?",
            Ipv4Addr::new(10, 1, 99, 99),
            &networks(),
        );
        assert_eq!(reply.unwrap(), b"skyfi:MyScope@10.1.2.3");
    }

    #[test]
    fn off_network_client_is_dropped() {
        let reply = handle_query(b"skyfi?", Ipv4Addr::new(172, 16, 0, 9), &networks());
        assert!(reply.is_none());
    }

    #[test]
    fn non_skyfi_traffic_is_ignored() {
        let reply = handle_query(b"alpacadiscovery1", Ipv4Addr::new(192, 168, 1, 50), &networks());
        assert!(reply.is_none());
    }

    #[test]
    fn cidr_matching() {
        assert_eq!(
            find_ip_in_cidr(Ipv4Addr::new(192, 168, 1, 200), &networks()),
            Some(Ipv4Addr::new(192, 168, 1, 23))
        );
        assert_eq!(
            find_ip_in_cidr(Ipv4Addr::new(192, 168, 2, 200), &networks()),
            None
        );
    }
}
