use std::os::raw::{c_int, c_uint};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use std::{mem, ptr};

use vpx_sys as vpx;
use parking_lot::Mutex;
use std::sync::Arc;

use super::{KeyFrameRequester, VideoError};
use crate::transport::{Address, RtpPacket, SharedSink, Sink};

/// Minimum spacing between forced-key-frame requests.
const KEY_FRAME_REQUEST_INTERVAL_MS: u128 = 500;

struct DecoderState {
    ctx: vpx::vpx_codec_ctx_t,
    key_frame_needed: bool,
    last_request: Option<Instant>,
    last_seq: u16,
    produce: Vec<u8>,
}

unsafe impl Send for DecoderState {}

impl Drop for DecoderState {
    fn drop(&mut self) {
        unsafe {
            vpx::vpx_codec_destroy(&mut self.ctx);
        }
    }
}

/// VP8 decoder node: reassembled frames in, RGB32 rasters out. Decode
/// failures and missing key frames after start are reported upstream
/// through the [`KeyFrameRequester`] reverse edge, rate limited so a burst
/// of bad frames produces one request.
pub struct VideoDecoder {
    receiver: Mutex<Option<SharedSink>>,
    loss_callback: Mutex<Option<Arc<dyn KeyFrameRequester>>>,
    state: Mutex<Option<DecoderState>>,
    runned: AtomicBool,
}

impl VideoDecoder {
    pub fn new() -> Self {
        Self {
            receiver: Mutex::new(None),
            loss_callback: Mutex::new(None),
            state: Mutex::new(None),
            runned: AtomicBool::new(false),
        }
    }

    pub fn set_receiver(&self, receiver: Option<SharedSink>) {
        *self.receiver.lock() = receiver;
    }

    pub fn set_loss_callback(&self, callback: Option<Arc<dyn KeyFrameRequester>>) {
        *self.loss_callback.lock() = callback;
    }

    pub fn start(&self) -> Result<(), VideoError> {
        if self.runned.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut ctx: vpx::vpx_codec_ctx_t = unsafe { mem::zeroed() };
        let rc = unsafe {
            vpx::vpx_codec_dec_init_ver(
                &mut ctx,
                vpx::vpx_codec_vp8_dx(),
                ptr::null(),
                0,
                vpx::VPX_DECODER_ABI_VERSION as c_int,
            )
        };
        if rc != vpx::vpx_codec_err_t::VPX_CODEC_OK {
            return Err(VideoError::Codec(format!("dec_init: {rc:?}")));
        }

        *self.state.lock() = Some(DecoderState {
            ctx,
            key_frame_needed: true,
            last_request: None,
            last_seq: 0,
            produce: Vec::new(),
        });
        self.runned.store(true, Ordering::SeqCst);

        tracing::info!("video decoder started");
        Ok(())
    }

    pub fn stop(&self) {
        self.runned.store(false, Ordering::SeqCst);
        *self.state.lock() = None;
    }

    pub fn is_started(&self) -> bool {
        self.runned.load(Ordering::SeqCst)
    }

    fn request_key_frame(&self, state: &mut DecoderState) {
        state.key_frame_needed = true;

        let now = Instant::now();
        let due = state
            .last_request
            .map(|at| now.duration_since(at).as_millis() >= KEY_FRAME_REQUEST_INTERVAL_MS)
            .unwrap_or(true);
        if !due {
            return;
        }
        state.last_request = Some(now);

        if let Some(callback) = self.loss_callback.lock().clone() {
            callback.force_key_frame(state.last_seq);
        }
    }
}

impl Default for VideoDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// VP8 bitstream: bit 0 of the first byte is clear on key frames.
fn is_key_frame(payload: &[u8]) -> bool {
    !payload.is_empty() && payload[0] & 0x01 == 0
}

/// BT.601 integer conversion of one decoded image into packed BGRA.
fn image_to_rgb32(image: &vpx::vpx_image_t, out: &mut Vec<u8>) -> (u16, u16) {
    let width = image.d_w as usize;
    let height = image.d_h as usize;
    out.resize(width * height * 4, 0);

    let y_stride = image.stride[0] as usize;
    let u_stride = image.stride[1] as usize;
    let v_stride = image.stride[2] as usize;

    for row in 0..height {
        let y_row = unsafe {
            std::slice::from_raw_parts(image.planes[0].add(row * y_stride), width)
        };
        let u_row = unsafe {
            std::slice::from_raw_parts(image.planes[1].add((row / 2) * u_stride), (width + 1) / 2)
        };
        let v_row = unsafe {
            std::slice::from_raw_parts(image.planes[2].add((row / 2) * v_stride), (width + 1) / 2)
        };

        for col in 0..width {
            let y = y_row[col] as i32 - 16;
            let u = u_row[col / 2] as i32 - 128;
            let v = v_row[col / 2] as i32 - 128;

            let r = (298 * y + 409 * v + 128) >> 8;
            let g = (298 * y - 100 * u - 208 * v + 128) >> 8;
            let b = (298 * y + 516 * u + 128) >> 8;

            let offset = (row * width + col) * 4;
            out[offset] = b.clamp(0, 255) as u8;
            out[offset + 1] = g.clamp(0, 255) as u8;
            out[offset + 2] = r.clamp(0, 255) as u8;
            out[offset + 3] = 255;
        }
    }

    (width as u16, height as u16)
}

impl Sink for VideoDecoder {
    fn send(&self, packet: &RtpPacket<'_>, _addr: Option<&Address>) {
        if !self.runned.load(Ordering::SeqCst) {
            return;
        }
        let receiver = self.receiver.lock().clone();

        let mut guard = self.state.lock();
        let Some(state) = guard.as_mut() else { return };

        state.last_seq = packet.header.sequence;

        if packet.payload.is_empty() {
            self.request_key_frame(state);
            return;
        }

        if state.key_frame_needed && !is_key_frame(packet.payload) {
            self.request_key_frame(state);
            return;
        }

        let rc = unsafe {
            vpx::vpx_codec_decode(
                &mut state.ctx,
                packet.payload.as_ptr(),
                packet.payload.len() as c_uint,
                ptr::null_mut(),
                0,
            )
        };
        if rc != vpx::vpx_codec_err_t::VPX_CODEC_OK {
            tracing::error!(
                "video decoder: decode failed on seq {}: {:?}",
                packet.header.sequence,
                rc
            );
            self.request_key_frame(state);
            return;
        }
        state.key_frame_needed = false;

        let Some(receiver) = receiver else { return };

        let mut iter: vpx::vpx_codec_iter_t = ptr::null();
        loop {
            let image = unsafe { vpx::vpx_codec_get_frame(&mut state.ctx, &mut iter) };
            if image.is_null() {
                break;
            }

            let mut produce = mem::take(&mut state.produce);
            image_to_rgb32(unsafe { &*image }, &mut produce);

            receiver.send(&RtpPacket::new(packet.header.clone(), &produce), None);
            state.produce = produce;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::CaptureSink;
    use crate::transport::{PayloadType, RtpHeader};
    use crate::video::{Resolution, VideoEncoder, VideoEncoderConfig};
    use std::sync::atomic::AtomicUsize;

    struct CountingRequester(AtomicUsize);

    impl KeyFrameRequester for CountingRequester {
        fn force_key_frame(&self, _seq: u16) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn encode_frames(count: usize) -> Vec<crate::transport::OwnedRtpPacket> {
        let sink = CaptureSink::new();
        let encoder = VideoEncoder::new();
        encoder.set_receiver(Some(sink.clone()));
        encoder
            .start(VideoEncoderConfig::camera(Resolution::QVGA, 2))
            .unwrap();

        for index in 0..count {
            let pixels = Resolution::QVGA.width as usize * Resolution::QVGA.height as usize;
            let mut frame = vec![(40 + index * 10) as u8; pixels];
            frame.resize(pixels * 3 / 2, 128);

            let header = RtpHeader {
                payload_type: PayloadType::Vp8 as u8,
                sequence: index as u16,
                timestamp: index as u32 * 3600,
                ..Default::default()
            };
            encoder.send(&RtpPacket::new(header, &frame), None);
        }

        let mut packets = sink.packets.lock();
        std::mem::take(&mut *packets)
    }

    #[test]
    fn decodes_key_frame_to_rgb32() {
        let frames = encode_frames(1);
        let sink = CaptureSink::new();

        let decoder = VideoDecoder::new();
        decoder.set_receiver(Some(sink.clone()));
        decoder.start().unwrap();

        decoder.send(&frames[0].packet(), None);

        let packets = sink.packets.lock();
        assert_eq!(packets.len(), 1);
        let pixels = Resolution::QVGA.width as usize * Resolution::QVGA.height as usize;
        assert_eq!(packets[0].payload.len(), pixels * 4);
    }

    #[test]
    fn delta_frame_before_key_frame_requests_recovery() {
        let frames = encode_frames(3);
        let sink = CaptureSink::new();
        let requester = Arc::new(CountingRequester(AtomicUsize::new(0)));

        let decoder = VideoDecoder::new();
        decoder.set_receiver(Some(sink.clone()));
        decoder.set_loss_callback(Some(requester.clone()));
        decoder.start().unwrap();

        // Skip the key frame; the first delta frame cannot be decoded.
        decoder.send(&frames[1].packet(), None);
        assert_eq!(sink.count(), 0);
        assert_eq!(requester.0.load(Ordering::SeqCst), 1);

        // A second bad frame inside the rate-limit window adds no request.
        decoder.send(&frames[2].packet(), None);
        assert_eq!(requester.0.load(Ordering::SeqCst), 1);

        // Recovery: the key frame decodes and playback resumes.
        decoder.send(&frames[0].packet(), None);
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn stopped_decoder_drops_input() {
        let frames = encode_frames(1);
        let sink = CaptureSink::new();

        let decoder = VideoDecoder::new();
        decoder.set_receiver(Some(sink.clone()));
        decoder.start().unwrap();
        decoder.stop();

        decoder.send(&frames[0].packet(), None);
        assert_eq!(sink.count(), 0);
    }
}
