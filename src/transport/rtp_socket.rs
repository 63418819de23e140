use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::udp::{DatagramHandler, TransportError, UdpTransport};
use super::{Address, PacketKind, RtpPacket, SharedSink, Sink};

/// RTP endpoint: a UDP transport plus inbound demultiplexing. Datagrams
/// are classified on the receive thread and forwarded to the RTP or RTCP
/// receiver sink; outbound packets are serialized and sent to the default
/// address unless the caller names one.
pub struct RtpSocket {
    shared: Arc<Shared>,
    transport: UdpTransport,
}

#[derive(Default)]
struct Shared {
    rtp: Mutex<Option<SharedSink>>,
    rtcp: Mutex<Option<SharedSink>>,
    default_addr: Mutex<Address>,
    malformed: AtomicU64,
}

impl RtpSocket {
    pub fn new() -> Self {
        let shared = Arc::new(Shared::default());

        let handler_shared = shared.clone();
        let handler: Arc<DatagramHandler> = Arc::new(move |data, addr, _port| {
            handler_shared.dispatch(data, addr);
        });

        Self {
            shared,
            transport: UdpTransport::new(handler),
        }
    }

    pub fn set_default_address(&self, address: Address) {
        *self.shared.default_addr.lock() = address;
    }

    pub fn set_receivers(&self, rtp: Option<SharedSink>, rtcp: Option<SharedSink>) {
        *self.shared.rtp.lock() = rtp;
        *self.shared.rtcp.lock() = rtcp;
    }

    pub fn start(&self, bind_port: u16) -> Result<(), TransportError> {
        self.transport.start(bind_port)
    }

    pub fn stop(&self) {
        self.transport.stop();
    }

    pub fn is_started(&self) -> bool {
        self.transport.is_started()
    }

    pub fn bound_port(&self) -> u16 {
        self.transport.bound_port()
    }

    /// Packets dropped because they failed RTP header parsing.
    pub fn malformed_count(&self) -> u64 {
        self.shared.malformed.load(Ordering::Relaxed)
    }
}

impl Default for RtpSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    fn dispatch(&self, data: &[u8], addr: &Address) {
        let kind = PacketKind::classify(data);

        // Marker-bearing media packets (e.g. end-of-frame video chunks)
        // classify as RTCP; with no RTCP receiver attached they belong to
        // the media chain.
        let receiver = match kind {
            PacketKind::Rtp => self.rtp.lock().clone(),
            PacketKind::Rtcp => self
                .rtcp
                .lock()
                .clone()
                .or_else(|| self.rtp.lock().clone()),
            PacketKind::Undefined => None,
        };

        let Some(receiver) = receiver else {
            return;
        };

        match RtpPacket::parse(data) {
            Ok(packet) => receiver.send(&packet, Some(addr)),
            Err(e) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::error!("dropping inbound packet from {}: {}", addr, e);
            }
        }
    }
}

impl Sink for RtpSocket {
    fn send(&self, packet: &RtpPacket<'_>, addr: Option<&Address>) {
        if !self.transport.is_started() {
            return;
        }

        let wire = packet.serialize();
        match addr {
            Some(address) => self.transport.send_to(&wire, address),
            None => {
                let default = self.shared.default_addr.lock().clone();
                self.transport.send_to(&wire, &default);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::CaptureSink;
    use crate::transport::{PayloadType, RtpHeader};
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::time::{Duration, Instant};

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn loopback_rtp_reaches_rtp_receiver() {
        let received = CaptureSink::new();

        let rx = RtpSocket::new();
        rx.set_receivers(Some(received.clone()), None);
        rx.start(0).unwrap();

        let tx = RtpSocket::new();
        tx.start(0).unwrap();
        tx.set_default_address(Address::V4(SocketAddrV4::new(
            Ipv4Addr::LOCALHOST,
            rx.bound_port(),
        )));

        let header = RtpHeader {
            payload_type: PayloadType::Opus as u8,
            sequence: 7,
            ..Default::default()
        };
        tx.send(&RtpPacket::new(header, b"pcm"), None);

        wait_for(|| received.count() == 1);
        assert_eq!(received.sequences(), vec![7]);

        tx.stop();
        rx.stop();
    }
}
