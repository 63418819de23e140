use std::sync::atomic::{AtomicBool, Ordering};

use opus::Channels;
use parking_lot::Mutex;

use super::{pcm_to_bytes, AudioError, FRAME_DURATION_MS};
use crate::transport::{Address, PayloadType, RtpHeader, RtpPacket, SharedSink, Sink};

struct DecoderState {
    opus: opus::Decoder,
    samples_per_frame: usize,
    channels: usize,
    last_seq: Option<u16>,
}

/// Decodes Opus RTP packets into PCM packets, preserving timestamp and
/// SSRC. A sequence gap of exactly one frame — or an empty payload
/// synthesized by the jitter buffer — is concealed with the codec's PLC.
pub struct AudioDecoder {
    receiver: Mutex<Option<SharedSink>>,
    state: Mutex<Option<DecoderState>>,
    runned: AtomicBool,
}

impl AudioDecoder {
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

    pub fn start(&self, sample_rate: u32, channels: u8) -> Result<(), AudioError> {
        if self.runned.load(Ordering::SeqCst) {
            return Ok(());
        }

        if !matches!(sample_rate, 8000 | 12000 | 16000 | 24000 | 48000) {
            return Err(AudioError::UnsupportedRate(sample_rate));
        }
        let opus_channels = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            other => return Err(AudioError::UnsupportedChannels(other)),
        };

        let opus = opus::Decoder::new(sample_rate, opus_channels)
            .map_err(|e| AudioError::Codec(e.to_string()))?;

        *self.state.lock() = Some(DecoderState {
            opus,
            samples_per_frame: (sample_rate * FRAME_DURATION_MS / 1000) as usize,
            channels: channels as usize,
            last_seq: None,
        });
        self.runned.store(true, Ordering::SeqCst);

        tracing::info!("audio decoder started: {} Hz, {} ch", sample_rate, channels);
        Ok(())
    }

    pub fn stop(&self) {
        self.runned.store(false, Ordering::SeqCst);
        *self.state.lock() = None;
    }

    pub fn is_started(&self) -> bool {
        self.runned.load(Ordering::SeqCst)
    }
}

impl Default for AudioDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn conceal(state: &mut DecoderState) -> Option<Vec<i16>> {
    let mut pcm = vec![0i16; state.samples_per_frame * state.channels];
    match state.opus.decode(&[], &mut pcm, true) {
        Ok(_) => Some(pcm),
        Err(e) => {
            tracing::error!("audio decoder: concealment failed: {}", e);
            None
        }
    }
}

impl Sink for AudioDecoder {
    fn send(&self, packet: &RtpPacket<'_>, _addr: Option<&Address>) {
        if !self.runned.load(Ordering::SeqCst) {
            return;
        }
        let Some(receiver) = self.receiver.lock().clone() else {
            return;
        };

        let mut guard = self.state.lock();
        let Some(state) = guard.as_mut() else { return };

        let sequence = packet.header.sequence;

        let emit = |header: RtpHeader, pcm: &[i16]| {
            let payload = pcm_to_bytes(pcm);
            receiver.send(&RtpPacket::new(header, &payload), None);
        };

        // One frame missing before this packet: conceal it first so the
        // renderer clock does not starve.
        if let Some(last) = state.last_seq {
            if sequence.wrapping_sub(last) as i16 == 2 && !packet.payload.is_empty() {
                if let Some(pcm) = conceal(state) {
                    let mut header = packet.header.clone();
                    header.sequence = last.wrapping_add(1);
                    header.payload_type = PayloadType::Pcm as u8;
                    emit(header, &pcm);
                }
            }
        }

        if packet.payload.is_empty() {
            // Stand-in from the jitter buffer for a lost frame.
            if let Some(pcm) = conceal(state) {
                let mut header = packet.header.clone();
                header.payload_type = PayloadType::Pcm as u8;
                emit(header, &pcm);
                state.last_seq = Some(sequence);
            }
            return;
        }

        let mut pcm = vec![0i16; state.samples_per_frame * state.channels];
        match state.opus.decode(packet.payload, &mut pcm, false) {
            Ok(samples) => {
                pcm.truncate(samples * state.channels);
                let mut header = packet.header.clone();
                header.payload_type = PayloadType::Pcm as u8;
                emit(header, &pcm);
                state.last_seq = Some(sequence);
            }
            Err(e) => {
                tracing::error!("audio decoder: decode failed on seq {}: {}", sequence, e);
            }
        }
    }
}
