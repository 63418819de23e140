//! Audio pipeline nodes: Opus codec framing, sample-rate conversion and
//! speech/silence detection.

mod decoder;
mod encoder;
mod resampler;
mod silence;

pub use decoder::AudioDecoder;
pub use encoder::{AudioEncoder, EncoderConfig};
pub use resampler::Resampler;
pub use silence::{SilenceCallback, SilenceDetector, SilenceMode};

use thiserror::Error;

/// Network-side sample rate (Opus native).
pub const SAMPLE_RATE: u32 = 48000;
/// Legacy device-side sample rate supported by the resampler.
pub const DEVICE_SAMPLE_RATE: u32 = 16000;
/// Frame duration used across the whole audio path.
pub const FRAME_DURATION_MS: u32 = 20;
/// Samples per 20-ms frame at the network rate (48000 / 50 = 960).
pub const SAMPLES_PER_FRAME: usize = (SAMPLE_RATE * FRAME_DURATION_MS / 1000) as usize;
/// Default Opus bitrate for voice.
pub const DEFAULT_BITRATE: i32 = 64000;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("unsupported sample rate {0}")]
    UnsupportedRate(u32),
    #[error("unsupported channel count {0}")]
    UnsupportedChannels(u8),
    #[error("codec error: {0}")]
    Codec(String),
}

pub(crate) fn pcm_from_bytes(payload: &[u8]) -> Vec<i16> {
    payload
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub(crate) fn pcm_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}
