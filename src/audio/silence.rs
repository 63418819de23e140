use parking_lot::Mutex;

use crate::transport::{Address, RtpPacket, Sink};

/// Window length of one measurement, in milliseconds of audio.
const MEASURE_TIME_LIMIT_MS: u32 = 3000;
/// Accumulated sample power that separates speech from silence over one
/// window (650000 per second of the window).
const SPEAK_POWER: u64 = 650_000 * 3;
/// Samples at or below this amplitude do not count towards the power sum.
const SAMPLE_FLOOR: i16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceMode {
    Silent,
    Speak,
}

/// Fired on every mode transition, at most once per 3-second window.
pub type SilenceCallback = Box<dyn Fn(SilenceMode) + Send + Sync>;

struct Window {
    power: u64,
    elapsed_ms: u32,
    mode: SilenceMode,
}

/// Measures short-window speech energy on decoded PCM and reports
/// speak/silent transitions, driving the `microphone_active` signalling.
///
/// Sample values above the floor are summed as-is — positive half-wave
/// only, matching the deployed behaviour; see DESIGN notes before touching
/// this.
pub struct SilenceDetector {
    callback: SilenceCallback,
    window: Mutex<Window>,
}

impl SilenceDetector {
    pub fn new(callback: SilenceCallback) -> Self {
        Self {
            callback,
            window: Mutex::new(Window {
                power: 0,
                elapsed_ms: 0,
                mode: SilenceMode::Silent,
            }),
        }
    }

    pub fn mode(&self) -> SilenceMode {
        self.window.lock().mode
    }
}

impl Sink for SilenceDetector {
    fn send(&self, packet: &RtpPacket<'_>, _addr: Option<&Address>) {
        let mut window = self.window.lock();

        for pair in packet.payload.chunks_exact(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            if sample > SAMPLE_FLOOR && window.power < u64::MAX - u16::MAX as u64 {
                window.power += sample as u64;
            }
        }

        window.elapsed_ms += 20;
        if window.elapsed_ms < MEASURE_TIME_LIMIT_MS {
            return;
        }

        let speaking = window.power >= SPEAK_POWER;
        let new_mode = if speaking {
            SilenceMode::Speak
        } else {
            SilenceMode::Silent
        };

        if new_mode != window.mode {
            window.mode = new_mode;
            tracing::debug!("silence detector: {:?}", new_mode);
            (self.callback)(new_mode);
        }

        window.power = 0;
        window.elapsed_ms = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm_to_bytes;
    use crate::transport::{PayloadType, RtpHeader};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn pcm_frame(amplitude: i16) -> Vec<u8> {
        pcm_to_bytes(&vec![amplitude; 320])
    }

    fn feed_window(detector: &SilenceDetector, amplitude: i16) {
        let payload = pcm_frame(amplitude);
        for seq in 0..150u16 {
            let header = RtpHeader {
                payload_type: PayloadType::Pcm as u8,
                sequence: seq,
                ..Default::default()
            };
            detector.send(&RtpPacket::new(header, &payload), None);
        }
    }

    #[test]
    fn one_callback_per_transition() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let calls_cb = calls.clone();
        let seen_cb = seen.clone();
        let detector = SilenceDetector::new(Box::new(move |mode| {
            calls_cb.fetch_add(1, Ordering::SeqCst);
            seen_cb.lock().push(mode);
        }));

        // Silent window: already silent, no callback.
        feed_window(&detector, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // Loud window: one Speak transition.
        feed_window(&detector, 2000);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().as_slice(), &[SilenceMode::Speak]);

        // Still loud: no extra callback.
        feed_window(&detector, 2000);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Quiet again: one Silent transition.
        feed_window(&detector, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(detector.mode(), SilenceMode::Silent);
    }

    #[test]
    fn negative_samples_do_not_accumulate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = calls.clone();
        let detector = SilenceDetector::new(Box::new(move |_| {
            calls_cb.fetch_add(1, Ordering::SeqCst);
        }));

        // Loud but strictly negative signal: the positive-sum quirk means
        // it never crosses the threshold.
        feed_window(&detector, -20000);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(detector.mode(), SilenceMode::Silent);
    }

    #[test]
    fn floor_amplitude_does_not_count() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = calls.clone();
        let detector = SilenceDetector::new(Box::new(move |_| {
            calls_cb.fetch_add(1, Ordering::SeqCst);
        }));

        feed_window(&detector, SAMPLE_FLOOR);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
