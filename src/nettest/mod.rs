//! Reachability probes used to pick the media transport before a call:
//! UDP first, framed TCP second, the WebSocket tunnel as a last resort.

use std::net::{Ipv4Addr, SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

/// Payload of the UDP echo probe.
const PROBE_MAGIC: &[u8] = b"convoke-probe";

/// Transport selected for media flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Udp,
    Tcp,
    Wsm,
}

/// True when the server echoes a datagram from `address` within the
/// timeout. Requires the server's media port to run an echo responder.
pub fn udp_reachable(address: SocketAddr, timeout: Duration) -> bool {
    let Ok(socket) = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)) else {
        return false;
    };
    if socket.set_read_timeout(Some(timeout)).is_err() {
        return false;
    }
    if socket.send_to(PROBE_MAGIC, address).is_err() {
        return false;
    }

    let mut buffer = [0u8; 64];
    match socket.recv_from(&mut buffer) {
        Ok((size, _)) => &buffer[..size] == PROBE_MAGIC,
        Err(_) => false,
    }
}

/// True when a TCP connection to `address` opens within the timeout.
pub fn tcp_reachable(address: SocketAddr, timeout: Duration) -> bool {
    TcpStream::connect_timeout(&address, timeout).is_ok()
}

/// Probe UDP then TCP media ports; fall back to the WebSocket tunnel when
/// both fail. `deny_udp` (a grants bit) skips the UDP probe outright.
pub fn pick_transport(
    udp_address: SocketAddr,
    tcp_address: SocketAddr,
    deny_udp: bool,
    timeout: Duration,
) -> TransportKind {
    if !deny_udp && udp_reachable(udp_address, timeout) {
        return TransportKind::Udp;
    }
    if tcp_reachable(tcp_address, timeout) {
        return TransportKind::Tcp;
    }
    TransportKind::Wsm
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn udp_probe_roundtrips_against_echo() {
        let echo = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let address = echo.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let mut buffer = [0u8; 64];
            let (size, from) = echo.recv_from(&mut buffer).unwrap();
            echo.send_to(&buffer[..size], from).unwrap();
        });

        assert!(udp_reachable(address, Duration::from_secs(2)));
        server.join().unwrap();
    }

    #[test]
    fn tcp_probe_detects_listener() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let address = listener.local_addr().unwrap();

        assert!(tcp_reachable(address, Duration::from_secs(2)));
    }

    #[test]
    fn deny_udp_skips_to_tcp() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let tcp = listener.local_addr().unwrap();
        // UDP address points nowhere; with deny_udp it is not even probed.
        let udp: SocketAddr = (Ipv4Addr::LOCALHOST, 1).into();

        assert_eq!(
            pick_transport(udp, tcp, true, Duration::from_millis(200)),
            TransportKind::Tcp
        );
    }
}
