use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::{pcm_from_bytes, pcm_to_bytes, AudioError, DEVICE_SAMPLE_RATE, SAMPLE_RATE};
use crate::transport::{Address, RtpPacket, SharedSink, Sink};

/// Fixed 16 kHz ↔ 48 kHz converter between the network-side Opus rate and
/// legacy 16-kHz devices. Works on 20-ms frames: 320 samples in → 960 out
/// when upsampling, 480-sample sub-frames consumed 3:1 when downsampling.
/// Identity when the rates match.
pub struct Resampler {
    receiver: Mutex<Option<SharedSink>>,
    rates: Mutex<(u32, u32)>,
    runned: AtomicBool,
}

impl Resampler {
    pub fn new() -> Self {
        Self {
            receiver: Mutex::new(None),
            rates: Mutex::new((SAMPLE_RATE, SAMPLE_RATE)),
            runned: AtomicBool::new(false),
        }
    }

    pub fn set_receiver(&self, receiver: Option<SharedSink>) {
        *self.receiver.lock() = receiver;
    }

    /// Only the 16/48 pair (either direction) and identity are supported.
    pub fn start(&self, in_rate: u32, out_rate: u32) -> Result<(), AudioError> {
        let supported = in_rate == out_rate
            || (in_rate == DEVICE_SAMPLE_RATE && out_rate == SAMPLE_RATE)
            || (in_rate == SAMPLE_RATE && out_rate == DEVICE_SAMPLE_RATE);
        if !supported {
            return Err(AudioError::UnsupportedRate(in_rate.max(out_rate)));
        }

        *self.rates.lock() = (in_rate, out_rate);
        self.runned.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn stop(&self) {
        self.runned.store(false, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.runned.load(Ordering::SeqCst)
    }
}

impl Default for Resampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Linear interpolation, one input sample becoming three.
fn upsample_3x(input: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(input.len() * 3);
    for (i, &sample) in input.iter().enumerate() {
        let next = input.get(i + 1).copied().unwrap_or(sample) as i32;
        let current = sample as i32;
        out.push(sample);
        out.push(((current * 2 + next) / 3) as i16);
        out.push(((current + next * 2) / 3) as i16);
    }
    out
}

/// 3:1 decimation with a mean over each triple to tame aliasing.
fn downsample_3x(input: &[i16]) -> Vec<i16> {
    input
        .chunks_exact(3)
        .map(|triple| {
            ((triple[0] as i32 + triple[1] as i32 + triple[2] as i32) / 3) as i16
        })
        .collect()
}

impl Sink for Resampler {
    fn send(&self, packet: &RtpPacket<'_>, addr: Option<&Address>) {
        if !self.runned.load(Ordering::SeqCst) {
            return;
        }
        let Some(receiver) = self.receiver.lock().clone() else {
            return;
        };

        let (in_rate, out_rate) = *self.rates.lock();
        if in_rate == out_rate {
            receiver.send(packet, addr);
            return;
        }

        let pcm = pcm_from_bytes(packet.payload);
        let resampled = if in_rate < out_rate {
            upsample_3x(&pcm)
        } else {
            downsample_3x(&pcm)
        };

        let payload = pcm_to_bytes(&resampled);
        receiver.send(&RtpPacket::new(packet.header.clone(), &payload), addr);
    }
}
