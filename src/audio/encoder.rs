use std::sync::atomic::{AtomicBool, Ordering};

use opus::{Application, Bitrate, Channels};
use parking_lot::Mutex;

use super::{pcm_from_bytes, AudioError, DEFAULT_BITRATE, FRAME_DURATION_MS};
use crate::transport::{Address, PayloadType, RtpHeader, RtpPacket, SharedSink, Sink};

/// Opus start-up parameters for one outgoing audio stream.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub sample_rate: u32,
    pub channels: u8,
    pub bitrate: i32,
    /// Expected packet loss percentage, tunes forward error correction.
    pub packet_loss: i32,
    pub ssrc: u32,
}

impl EncoderConfig {
    pub fn voice(ssrc: u32) -> Self {
        Self {
            sample_rate: super::SAMPLE_RATE,
            channels: 1,
            bitrate: DEFAULT_BITRATE,
            packet_loss: 10,
            ssrc,
        }
    }
}

struct EncoderState {
    opus: opus::Encoder,
    sequence: u16,
    timestamp: u32,
    samples_per_frame: usize,
    ssrc: u32,
}

/// Encodes 20-ms signed-16-bit PCM frames into Opus RTP packets.
/// Timestamps advance by one frame of samples per packet; sequence
/// numbers start random per RFC 3550.
pub struct AudioEncoder {
    receiver: Mutex<Option<SharedSink>>,
    state: Mutex<Option<EncoderState>>,
    runned: AtomicBool,
}

impl AudioEncoder {
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

    pub fn start(&self, config: EncoderConfig) -> Result<(), AudioError> {
        if self.runned.load(Ordering::SeqCst) {
            return Ok(());
        }

        if !matches!(config.sample_rate, 8000 | 12000 | 16000 | 24000 | 48000) {
            return Err(AudioError::UnsupportedRate(config.sample_rate));
        }
        let channels = match config.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            other => return Err(AudioError::UnsupportedChannels(other)),
        };

        let mut opus = opus::Encoder::new(config.sample_rate, channels, Application::Voip)
            .map_err(|e| AudioError::Codec(e.to_string()))?;
        opus.set_bitrate(Bitrate::Bits(config.bitrate))
            .map_err(|e| AudioError::Codec(e.to_string()))?;
        opus.set_inband_fec(true)
            .map_err(|e| AudioError::Codec(e.to_string()))?;
        opus.set_packet_loss_perc(config.packet_loss)
            .map_err(|e| AudioError::Codec(e.to_string()))?;

        let samples_per_frame =
            (config.sample_rate * FRAME_DURATION_MS / 1000) as usize * config.channels as usize;

        *self.state.lock() = Some(EncoderState {
            opus,
            sequence: rand::random(),
            timestamp: rand::random(),
            samples_per_frame,
            ssrc: config.ssrc,
        });
        self.runned.store(true, Ordering::SeqCst);

        tracing::info!(
            "audio encoder started: {} Hz, {} ch, {} bps",
            config.sample_rate,
            config.channels,
            config.bitrate
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

    /// Live bitrate change, e.g. on a `set_max_bitrate` command.
    pub fn set_bitrate(&self, bitrate: i32) {
        if let Some(state) = self.state.lock().as_mut() {
            if let Err(e) = state.opus.set_bitrate(Bitrate::Bits(bitrate)) {
                tracing::error!("audio encoder: set_bitrate failed: {}", e);
            }
        }
    }

    /// Live FEC retuning from observed loss.
    pub fn set_packet_loss(&self, percent: i32) {
        if let Some(state) = self.state.lock().as_mut() {
            if let Err(e) = state.opus.set_packet_loss_perc(percent) {
                tracing::error!("audio encoder: set_packet_loss failed: {}", e);
            }
        }
    }
}

impl Default for AudioEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for AudioEncoder {
    fn send(&self, packet: &RtpPacket<'_>, _addr: Option<&Address>) {
        if !self.runned.load(Ordering::SeqCst) {
            return;
        }
        let Some(receiver) = self.receiver.lock().clone() else {
            return;
        };

        let mut guard = self.state.lock();
        let Some(state) = guard.as_mut() else { return };

        let pcm = pcm_from_bytes(packet.payload);
        if pcm.len() != state.samples_per_frame {
            tracing::trace!(
                "audio encoder: dropping frame of {} samples (want {})",
                pcm.len(),
                state.samples_per_frame
            );
            return;
        }

        let mut encoded = vec![0u8; 1500];
        let size = match state.opus.encode(&pcm, &mut encoded) {
            Ok(size) => size,
            Err(e) => {
                tracing::error!("audio encoder: encode failed: {}", e);
                return;
            }
        };

        state.sequence = state.sequence.wrapping_add(1);
        state.timestamp = state
            .timestamp
            .wrapping_add(state.samples_per_frame as u32);

        let header = RtpHeader {
            payload_type: PayloadType::Opus as u8,
            sequence: state.sequence,
            timestamp: state.timestamp,
            ssrc: state.ssrc,
            ..Default::default()
        };

        receiver.send(&RtpPacket::new(header, &encoded[..size]), None);
    }
}
