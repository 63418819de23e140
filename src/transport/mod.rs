//! Media transport: packet model, addressing and the socket family.
//!
//! Every pipeline node — sockets, crypto, codecs, jitter buffers — speaks
//! the same one-method [`Sink`] trait and composes by holding a reference
//! to its downstream sink. Sinks may be set after construction so chains
//! can be rewired at runtime.

mod address;
mod ports;
mod rtp;
mod rtp_socket;
mod tcp;
mod udp;
mod wsm;

pub use address::Address;
pub use ports::{PortPool, MEDIA_PORT_FIRST, MEDIA_PORT_LAST};
pub use rtp::{
    OwnedRtpPacket, PacketError, PacketKind, PayloadType, RtpHeader, RtpPacket, RTP_HEADER_SIZE,
};
pub use rtp_socket::RtpSocket;
pub use tcp::{TcpTunnel, TunnelError};
pub use udp::{DatagramHandler, TransportError, UdpTransport, MAX_DATAGRAM_SIZE};
pub use wsm::WsmTunnel;

use std::sync::Arc;

use parking_lot::Mutex;

/// One pipeline node input. Implementations must never block the caller
/// and never fail: a packet is either consumed or dropped.
pub trait Sink: Send + Sync {
    fn send(&self, packet: &RtpPacket<'_>, addr: Option<&Address>);
}

/// Shared handle to a downstream node. The holder does not own the node;
/// session teardown stops sources before sinks.
pub type SharedSink = Arc<dyn Sink>;

/// Fans one packet out to two downstream sinks, e.g. decoded audio to both
/// the renderer chain and the silence detector.
#[derive(Default)]
pub struct SinkSplitter {
    first: Mutex<Option<SharedSink>>,
    second: Mutex<Option<SharedSink>>,
}

impl SinkSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_first(&self, sink: Option<SharedSink>) {
        *self.first.lock() = sink;
    }

    pub fn set_second(&self, sink: Option<SharedSink>) {
        *self.second.lock() = sink;
    }
}

impl Sink for SinkSplitter {
    fn send(&self, packet: &RtpPacket<'_>, addr: Option<&Address>) {
        if let Some(sink) = self.first.lock().as_ref() {
            sink.send(packet, addr);
        }
        if let Some(sink) = self.second.lock().as_ref() {
            sink.send(packet, addr);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Collects everything sent to it; test helper shared by the pipeline
    /// node tests.
    #[derive(Default)]
    pub struct CaptureSink {
        pub packets: Mutex<Vec<OwnedRtpPacket>>,
    }

    impl CaptureSink {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn count(&self) -> usize {
            self.packets.lock().len()
        }

        pub fn sequences(&self) -> Vec<u16> {
            self.packets.lock().iter().map(|p| p.header.sequence).collect()
        }
    }

    impl Sink for CaptureSink {
        fn send(&self, packet: &RtpPacket<'_>, _addr: Option<&Address>) {
            self.packets.lock().push(OwnedRtpPacket::new(
                packet.header.clone(),
                packet.payload,
                PayloadType::from_u8(packet.header.payload_type),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::CaptureSink;
    use super::*;

    #[test]
    fn splitter_fans_out_to_both_sinks() {
        let first = CaptureSink::new();
        let second = CaptureSink::new();

        let splitter = SinkSplitter::new();
        splitter.set_first(Some(first.clone()));
        splitter.set_second(Some(second.clone()));

        let packet = RtpPacket::new(RtpHeader::default(), b"frame");
        splitter.send(&packet, None);

        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 1);

        splitter.set_second(None);
        splitter.send(&packet, None);
        assert_eq!(first.count(), 2);
        assert_eq!(second.count(), 1);
    }
}
