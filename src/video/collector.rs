use std::sync::Arc;

use parking_lot::Mutex;

use super::KeyFrameRequester;
use crate::transport::{Address, RtpPacket, SharedSink, Sink};

const TAG_START: u8 = 0x10;
const TAG_MIDDLE: u8 = 0x00;
const TAG_END: u8 = 0x20;
const TAG_SINGLE: u8 = 0x30;

struct CollectorState {
    buffer: Vec<u8>,
    collecting: bool,
    current_frame_seq: u16,
    last_packet_seq: Option<u16>,
    last_crc32: u32,
}

/// Reassembles split video frames by sequence number. Any break in the
/// chunk sequence discards the frame under assembly and asks the sender
/// for a key frame; a completed frame whose CRC32 equals the previous
/// one is a duplicate and is suppressed.
pub struct FrameCollector {
    receiver: Mutex<Option<SharedSink>>,
    loss_callback: Mutex<Option<Arc<dyn KeyFrameRequester>>>,
    state: Mutex<CollectorState>,
}

impl FrameCollector {
    pub fn new() -> Self {
        Self {
            receiver: Mutex::new(None),
            loss_callback: Mutex::new(None),
            state: Mutex::new(CollectorState {
                buffer: Vec::new(),
                collecting: false,
                current_frame_seq: 0,
                last_packet_seq: None,
                last_crc32: 0,
            }),
        }
    }

    pub fn set_receiver(&self, receiver: Option<SharedSink>) {
        *self.receiver.lock() = receiver;
    }

    pub fn set_loss_callback(&self, callback: Option<Arc<dyn KeyFrameRequester>>) {
        *self.loss_callback.lock() = callback;
    }

    /// Drop any partial frame, e.g. on SSRC change.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.buffer.clear();
        state.collecting = false;
        state.last_packet_seq = None;
        state.last_crc32 = 0;
    }
}

impl Default for FrameCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for FrameCollector {
    fn send(&self, packet: &RtpPacket<'_>, addr: Option<&Address>) {
        if packet.payload.is_empty() {
            return;
        }

        let tag = packet.payload[0];
        let data = &packet.payload[1..];
        let sequence = packet.header.sequence;

        let mut state = self.state.lock();

        // Rule 1: a hole in the chunk sequence kills the frame under
        // assembly; recovery comes via a forced key frame.
        if let Some(last) = state.last_packet_seq {
            if sequence != last.wrapping_add(1) {
                if state.collecting {
                    tracing::debug!(
                        "frame collector: chunk gap {} -> {}, dropping frame",
                        last,
                        sequence
                    );
                }
                state.buffer.clear();
                state.collecting = false;

                if let Some(callback) = self.loss_callback.lock().clone() {
                    callback.force_key_frame(sequence);
                }
            }
        }
        state.last_packet_seq = Some(sequence);

        match tag {
            TAG_START => {
                state.buffer.clear();
                state.buffer.extend_from_slice(data);
                state.current_frame_seq = sequence;
                state.collecting = true;
            }
            TAG_MIDDLE => {
                if state.collecting {
                    state.buffer.extend_from_slice(data);
                }
            }
            TAG_END => {
                if state.collecting {
                    state.buffer.extend_from_slice(data);
                    self.finish(&mut state, packet, addr);
                }
            }
            TAG_SINGLE => {
                state.buffer.clear();
                state.buffer.extend_from_slice(data);
                state.current_frame_seq = sequence;
                state.collecting = true;
                self.finish(&mut state, packet, addr);
            }
            unknown => {
                tracing::error!("frame collector: unknown chunk tag {:#04x}", unknown);
                state.buffer.clear();
                state.collecting = false;
            }
        }
    }
}

impl FrameCollector {
    fn finish(&self, state: &mut CollectorState, packet: &RtpPacket<'_>, addr: Option<&Address>) {
        state.collecting = false;

        let crc = crc32fast::hash(&state.buffer);
        if crc == state.last_crc32 {
            tracing::trace!("frame collector: duplicate frame suppressed");
            state.buffer.clear();
            return;
        }
        state.last_crc32 = crc;

        let Some(receiver) = self.receiver.lock().clone() else {
            state.buffer.clear();
            return;
        };

        let mut header = packet.header.clone();
        header.sequence = state.current_frame_seq;
        header.marker = true;

        receiver.send(&RtpPacket::new(header, &state.buffer), addr);
        state.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::CaptureSink;
    use crate::transport::{PayloadType, RtpHeader};
    use crate::video::{FrameSplitter, SPLIT_PACKET_SIZE};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRequester(AtomicUsize);

    impl KeyFrameRequester for CountingRequester {
        fn force_key_frame(&self, _last_received_seq: u16) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn frame_header() -> RtpHeader {
        RtpHeader {
            payload_type: PayloadType::Vp8 as u8,
            timestamp: 123,
            ssrc: 9,
            ..Default::default()
        }
    }

    fn split(payload: &[u8]) -> Vec<crate::transport::OwnedRtpPacket> {
        let sink = CaptureSink::new();
        let splitter = FrameSplitter::new();
        splitter.set_receiver(Some(sink.clone()));
        splitter.send(&RtpPacket::new(frame_header(), payload), None);
        let mut packets = sink.packets.lock();
        std::mem::take(&mut *packets)
    }

    #[test]
    fn split_then_collect_reproduces_the_frame() {
        let frame: Vec<u8> = (0..1200u32).map(|i| (i * 7) as u8).collect();
        let chunks = split(&frame);

        let sink = CaptureSink::new();
        let collector = FrameCollector::new();
        collector.set_receiver(Some(sink.clone()));

        for chunk in &chunks {
            collector.send(&chunk.packet(), None);
        }

        let packets = sink.packets.lock();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload, frame);
        assert!(packets[0].header.marker);
    }

    #[test]
    fn lost_chunk_drops_frame_and_requests_key_frame() {
        let frame: Vec<u8> = (0..3 * SPLIT_PACKET_SIZE).map(|i| i as u8).collect();
        let chunks = split(&frame);
        assert_eq!(chunks.len(), 3);

        let sink = CaptureSink::new();
        let requester = Arc::new(CountingRequester(AtomicUsize::new(0)));

        let collector = FrameCollector::new();
        collector.set_receiver(Some(sink.clone()));
        collector.set_loss_callback(Some(requester.clone()));

        collector.send(&chunks[0].packet(), None);
        // chunk 1 lost
        collector.send(&chunks[2].packet(), None);

        assert_eq!(sink.count(), 0);
        assert_eq!(requester.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_frame_is_suppressed_by_crc() {
        let frame = vec![42u8; 600];

        let sink = CaptureSink::new();
        let collector = FrameCollector::new();
        collector.set_receiver(Some(sink.clone()));

        for chunk in split(&frame) {
            collector.send(&chunk.packet(), None);
        }
        // Same frame split again: sequences continue, content identical.
        let splitter = FrameSplitter::new();
        let resplit = CaptureSink::new();
        splitter.set_receiver(Some(resplit.clone()));
        splitter.send(&RtpPacket::new(frame_header(), &frame), None);
        splitter.send(&RtpPacket::new(frame_header(), &frame), None);

        let chunks = resplit.packets.lock();
        for chunk in chunks.iter().skip(2) {
            collector.send(&chunk.packet(), None);
        }

        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn recovers_on_next_start_tag_after_loss() {
        let first: Vec<u8> = vec![1u8; 2 * SPLIT_PACKET_SIZE];
        let second: Vec<u8> = vec![2u8; 600];

        let splitter = FrameSplitter::new();
        let split_sink = CaptureSink::new();
        splitter.set_receiver(Some(split_sink.clone()));
        splitter.send(&RtpPacket::new(frame_header(), &first), None);
        splitter.send(&RtpPacket::new(frame_header(), &second), None);

        let chunks = split_sink.packets.lock();

        let sink = CaptureSink::new();
        let collector = FrameCollector::new();
        collector.set_receiver(Some(sink.clone()));

        // Drop the tail of the first frame; the second frame must still
        // assemble from its start tag.
        collector.send(&chunks[0].packet(), None);
        for chunk in chunks.iter().skip(2) {
            collector.send(&chunk.packet(), None);
        }

        let packets = sink.packets.lock();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload, second);
    }
}
