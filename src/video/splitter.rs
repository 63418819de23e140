use parking_lot::Mutex;

use crate::transport::{Address, RtpPacket, SharedSink, Sink};

/// Chunk payload budget. With the flag byte, RTP header and lower-layer
/// overhead the wire datagram stays under a 576-byte path MTU.
pub const SPLIT_PACKET_SIZE: usize = 509;

/// Start-of-frame chunk.
const TAG_START: u8 = 0x10;
/// Interior chunk.
const TAG_MIDDLE: u8 = 0x00;
/// Final chunk; the RTP marker bit is set alongside.
const TAG_END: u8 = 0x20;
/// Whole frame in one chunk; marker set as well.
const TAG_SINGLE: u8 = 0x30;

/// Splits one encoded video frame (arriving as a single logical RTP
/// packet) into MTU-sized chunks. Output sequence numbers are a running
/// counter across frames so the collector can detect loss by simple
/// increment checks; timestamp and SSRC are copied unchanged.
pub struct FrameSplitter {
    receiver: Mutex<Option<SharedSink>>,
    last_seq: Mutex<u16>,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self {
            receiver: Mutex::new(None),
            last_seq: Mutex::new(0),
        }
    }

    pub fn set_receiver(&self, receiver: Option<SharedSink>) {
        *self.receiver.lock() = receiver;
    }

    /// Restart the chunk sequence, e.g. on SSRC change.
    pub fn reset(&self) {
        *self.last_seq.lock() = 0;
    }
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for FrameSplitter {
    fn send(&self, packet: &RtpPacket<'_>, addr: Option<&Address>) {
        let Some(receiver) = self.receiver.lock().clone() else {
            return;
        };
        if packet.payload.is_empty() {
            return;
        }

        let chunks: Vec<&[u8]> = packet.payload.chunks(SPLIT_PACKET_SIZE).collect();
        let total = chunks.len();

        let mut seq = self.last_seq.lock();
        let mut buffer = Vec::with_capacity(SPLIT_PACKET_SIZE + 1);

        for (index, chunk) in chunks.into_iter().enumerate() {
            let last = index + 1 == total;
            let tag = match (index, last) {
                (0, true) => TAG_SINGLE,
                (0, false) => TAG_START,
                (_, false) => TAG_MIDDLE,
                (_, true) => TAG_END,
            };

            buffer.clear();
            buffer.push(tag);
            buffer.extend_from_slice(chunk);

            *seq = seq.wrapping_add(1);

            let mut header = packet.header.clone();
            header.sequence = *seq;
            header.marker = last;

            receiver.send(&RtpPacket::new(header, &buffer), addr);
        }
    }
}
