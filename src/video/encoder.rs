use std::os::raw::{c_int, c_uint, c_ulong};
use std::sync::atomic::{AtomicBool, Ordering};
use std::{mem, ptr};

use vpx_sys as vpx;
use parking_lot::Mutex;

use super::{KeyFrameRequester, Resolution, VideoError};
use crate::transport::{Address, PayloadType, RtpHeader, RtpPacket, SharedSink, Sink};

/// Frame interval at the nominal 25 fps video cadence, used as the libvpx
/// pts step (millisecond timebase).
const FRAME_INTERVAL_MS: i64 = 40;

#[derive(Debug, Clone)]
pub struct VideoEncoderConfig {
    pub resolution: Resolution,
    pub bitrate_kbit: u32,
    /// Screen shares get rate control tuned for static content with sharp
    /// edges instead of camera noise.
    pub screen_content: bool,
    pub ssrc: u32,
}

impl VideoEncoderConfig {
    pub fn camera(resolution: Resolution, ssrc: u32) -> Self {
        Self {
            resolution,
            bitrate_kbit: 1024,
            screen_content: false,
            ssrc,
        }
    }
}

struct EncoderState {
    ctx: vpx::vpx_codec_ctx_t,
    cfg: vpx::vpx_codec_enc_cfg_t,
    resolution: Resolution,
    ssrc: u32,
    sequence: u16,
    pts: i64,
    force_kf: bool,
}

// The codec context is single-owner behind the state mutex.
unsafe impl Send for EncoderState {}

impl Drop for EncoderState {
    fn drop(&mut self) {
        unsafe {
            vpx::vpx_codec_destroy(&mut self.ctx);
        }
    }
}

/// VP8 encoder node: planar I420 frames in, one RTP packet per encoded
/// frame out. The loss-recovery path flips the forced-key-frame flag via
/// [`KeyFrameRequester`]; the flag clears after the next encode.
pub struct VideoEncoder {
    receiver: Mutex<Option<SharedSink>>,
    state: Mutex<Option<EncoderState>>,
    runned: AtomicBool,
}

impl VideoEncoder {
    pub fn new() -> Self {
        Self {
            receiver: Mutex::new(None),
            state: Mutex::new(None),
            runned: AtomicBool::new(false),
        }
    }

    pub fn set_receiver(&self, receiver: Option<SharedSink>) {
        *self.receiver.lock() = receiver;
    }

    pub fn start(&self, config: VideoEncoderConfig) -> Result<(), VideoError> {
        if self.runned.load(Ordering::SeqCst) {
            return Ok(());
        }

        let Resolution { width, height } = config.resolution;
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(VideoError::InvalidResolution(width, height));
        }

        let mut cfg: vpx::vpx_codec_enc_cfg_t =
            unsafe { mem::MaybeUninit::zeroed().assume_init() };
        let rc = unsafe {
            vpx::vpx_codec_enc_config_default(vpx::vpx_codec_vp8_cx(), &mut cfg, 0)
        };
        if rc != vpx::vpx_codec_err_t::VPX_CODEC_OK {
            return Err(VideoError::Codec(format!("enc_config_default: {rc:?}")));
        }

        cfg.g_w = width as c_uint;
        cfg.g_h = height as c_uint;
        cfg.g_timebase.num = 1;
        cfg.g_timebase.den = 1000;
        cfg.rc_target_bitrate = config.bitrate_kbit as c_uint;
        cfg.g_threads = 2;
        cfg.g_lag_in_frames = 0;
        cfg.g_error_resilient = 1;
        cfg.rc_end_usage = vpx::vpx_rc_mode::VPX_CBR;
        if config.screen_content {
            // Static content: long key-frame distance, tight quantizer.
            cfg.kf_max_dist = 600;
            cfg.rc_min_quantizer = 2;
            cfg.rc_max_quantizer = 40;
        } else {
            cfg.kf_max_dist = 120;
        }

        let mut ctx: vpx::vpx_codec_ctx_t = unsafe { mem::zeroed() };
        let rc = unsafe {
            vpx::vpx_codec_enc_init_ver(
                &mut ctx,
                vpx::vpx_codec_vp8_cx(),
                &cfg,
                0,
                vpx::VPX_ENCODER_ABI_VERSION as c_int,
            )
        };
        if rc != vpx::vpx_codec_err_t::VPX_CODEC_OK {
            return Err(VideoError::Codec(format!("enc_init: {rc:?}")));
        }

        *self.state.lock() = Some(EncoderState {
            ctx,
            cfg,
            resolution: config.resolution,
            ssrc: config.ssrc,
            sequence: rand::random(),
            pts: 0,
            force_kf: false,
        });
        self.runned.store(true, Ordering::SeqCst);

        tracing::info!(
            "video encoder started: {}x{} @ {} kbit{}",
            width,
            height,
            config.bitrate_kbit,
            if config.screen_content { " (screen)" } else { "" }
        );
        Ok(())
    }

    pub fn stop(&self) {
        self.runned.store(false, Ordering::SeqCst);
        *self.state.lock() = None;
    }

    pub fn is_started(&self) -> bool {
        self.runned.load(Ordering::SeqCst)
    }

    /// Live bitrate change without a codec restart.
    pub fn set_bitrate(&self, bitrate_kbit: u32) {
        if let Some(state) = self.state.lock().as_mut() {
            state.cfg.rc_target_bitrate = bitrate_kbit as c_uint;
            let rc = unsafe { vpx::vpx_codec_enc_config_set(&mut state.ctx, &state.cfg) };
            if rc != vpx::vpx_codec_err_t::VPX_CODEC_OK {
                tracing::error!("video encoder: enc_config_set failed: {:?}", rc);
            }
        }
    }
}

impl Default for VideoEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyFrameRequester for VideoEncoder {
    fn force_key_frame(&self, last_received_seq: u16) {
        if let Some(state) = self.state.lock().as_mut() {
            tracing::debug!(
                "video encoder: key frame forced (receiver stuck at seq {})",
                last_received_seq
            );
            state.force_kf = true;
        }
    }
}

impl Sink for VideoEncoder {
    fn send(&self, packet: &RtpPacket<'_>, _addr: Option<&Address>) {
        if !self.runned.load(Ordering::SeqCst) {
            return;
        }
        let Some(receiver) = self.receiver.lock().clone() else {
            return;
        };

        let mut guard = self.state.lock();
        let Some(state) = guard.as_mut() else { return };

        let Resolution { width, height } = state.resolution;
        let expected = width as usize * height as usize * 3 / 2;
        if packet.payload.len() < expected {
            tracing::trace!(
                "video encoder: short I420 frame ({} < {})",
                packet.payload.len(),
                expected
            );
            return;
        }

        let mut image: vpx::vpx_image_t = unsafe { mem::zeroed() };
        let wrapped = unsafe {
            vpx::vpx_img_wrap(
                &mut image,
                vpx::vpx_img_fmt::VPX_IMG_FMT_I420,
                width as c_uint,
                height as c_uint,
                1,
                packet.payload.as_ptr() as *mut u8,
            )
        };
        if wrapped.is_null() {
            tracing::error!("video encoder: vpx_img_wrap failed");
            return;
        }

        let flags: vpx::vpx_enc_frame_flags_t = if state.force_kf {
            vpx::VPX_EFLAG_FORCE_KF as vpx::vpx_enc_frame_flags_t
        } else {
            0
        };
        state.force_kf = false;

        let rc = unsafe {
            vpx::vpx_codec_encode(
                &mut state.ctx,
                &image,
                state.pts,
                FRAME_INTERVAL_MS as c_ulong,
                flags,
                vpx::VPX_DL_REALTIME as c_ulong,
            )
        };
        state.pts += FRAME_INTERVAL_MS;
        if rc != vpx::vpx_codec_err_t::VPX_CODEC_OK {
            tracing::error!("video encoder: encode failed: {:?}", rc);
            return;
        }

        let mut iter: vpx::vpx_codec_iter_t = ptr::null();
        loop {
            let pkt = unsafe { vpx::vpx_codec_get_cx_data(&mut state.ctx, &mut iter) };
            if pkt.is_null() {
                break;
            }

            let pkt = unsafe { &*pkt };
            if pkt.kind != vpx::vpx_codec_cx_pkt_kind::VPX_CODEC_CX_FRAME_PKT {
                continue;
            }

            let frame = unsafe { &pkt.data.frame };
            let encoded = unsafe {
                std::slice::from_raw_parts(frame.buf as *const u8, frame.sz as usize)
            };

            state.sequence = state.sequence.wrapping_add(1);
            let header = RtpHeader {
                payload_type: PayloadType::Vp8 as u8,
                sequence: state.sequence,
                timestamp: packet.header.timestamp,
                ssrc: state.ssrc,
                ..Default::default()
            };

            receiver.send(&RtpPacket::new(header, encoded), None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::CaptureSink;

    fn i420_frame(resolution: Resolution, luma: u8) -> Vec<u8> {
        let pixels = resolution.width as usize * resolution.height as usize;
        let mut frame = vec![luma; pixels];
        frame.resize(pixels * 3 / 2, 128); // neutral chroma
        frame
    }

    /// VP8 bitstream: bit 0 of the first byte is zero for key frames.
    fn is_key_frame(payload: &[u8]) -> bool {
        !payload.is_empty() && payload[0] & 0x01 == 0
    }

    fn input_packet(sequence: u16) -> RtpHeader {
        RtpHeader {
            payload_type: PayloadType::Vp8 as u8,
            sequence,
            timestamp: u32::from(sequence) * 3600,
            ..Default::default()
        }
    }

    #[test]
    fn first_frame_is_a_key_frame() {
        let sink = CaptureSink::new();
        let encoder = VideoEncoder::new();
        encoder.set_receiver(Some(sink.clone()));
        encoder
            .start(VideoEncoderConfig::camera(Resolution::QVGA, 3))
            .unwrap();

        let frame = i420_frame(Resolution::QVGA, 64);
        encoder.send(&RtpPacket::new(input_packet(0), &frame), None);

        let packets = sink.packets.lock();
        assert_eq!(packets.len(), 1);
        assert!(is_key_frame(&packets[0].payload));
        assert_eq!(packets[0].header.ssrc, 3);
    }

    #[test]
    fn forced_key_frame_flag_applies_once() {
        let sink = CaptureSink::new();
        let encoder = VideoEncoder::new();
        encoder.set_receiver(Some(sink.clone()));
        encoder
            .start(VideoEncoderConfig::camera(Resolution::QVGA, 3))
            .unwrap();

        // Prime with a few frames so the next one would be a delta frame.
        for seq in 0..3u16 {
            let frame = i420_frame(Resolution::QVGA, 60 + seq as u8);
            encoder.send(&RtpPacket::new(input_packet(seq), &frame), None);
        }
        assert!(!is_key_frame(&sink.packets.lock()[2].payload));

        encoder.force_key_frame(2);
        let frame = i420_frame(Resolution::QVGA, 90);
        encoder.send(&RtpPacket::new(input_packet(3), &frame), None);
        assert!(is_key_frame(&sink.packets.lock()[3].payload));

        let frame = i420_frame(Resolution::QVGA, 91);
        encoder.send(&RtpPacket::new(input_packet(4), &frame), None);
        assert!(!is_key_frame(&sink.packets.lock()[4].payload));
    }

    #[test]
    fn rejects_odd_resolution() {
        let encoder = VideoEncoder::new();
        let result = encoder.start(VideoEncoderConfig::camera(Resolution::new(321, 240), 1));
        assert!(matches!(result, Err(VideoError::InvalidResolution(321, 240))));
        assert!(!encoder.is_started());
    }
}
