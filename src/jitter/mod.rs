//! Adaptive jitter buffer: absorbs arrival jitter, reorders out-of-order
//! packets and hands frames to the renderer on a regular clock while
//! keeping the added latency proportional to the measured jitter, not to a
//! worst-case constant.
//!
//! Arrival intervals run through a scalar Kalman filter; the deviation of
//! each interval from the filtered mean feeds a sliding window whose
//! standard deviation drives the pre-play reserve. Smooth streams ride on
//! one or two frames of reserve, bursty ones grow it up to the mode cap.

mod stat;

pub use stat::StatMeter;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::transport::{Address, OwnedRtpPacket, PayloadType, RtpPacket, Sink};

/// Process noise of the arrival-interval filter.
const KALMAN_Q: f64 = 0.001;
/// Reserve frames per standard deviation of arrival jitter. Hand tuned.
const K_JITTER: f64 = 2.0;
/// Samples in the deviation window.
const STAT_WINDOW: usize = 50;
/// Wall-clock between reserve recomputations, in milliseconds.
const CHECK_INTERVAL_MS: u128 = 200;
/// Hard bound on queued packets; a full buffer means the sink stopped
/// keeping up and inserts are dropped instead of growing latency.
const CAPACITY: usize = 120;

/// Mode selects frame-duration defaults and whether lost audio frames get
/// a synthesized stand-in for codec concealment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterMode {
    Video,
    Sound,
}

impl JitterMode {
    fn default_frame_ms(self) -> u32 {
        match self {
            Self::Video => 40,
            Self::Sound => 20,
        }
    }

    fn reserve_bounds(self) -> (usize, usize) {
        match self {
            Self::Video => (1, 12),
            Self::Sound => (2, 25),
        }
    }
}

struct State {
    mode: JitterMode,
    frame_ms: u32,

    buffer: VecDeque<OwnedRtpPacket>,
    stat: StatMeter,

    buffering: bool,
    reserve_count: usize,

    prev_rx: Option<Instant>,
    state_rx: f64,
    covariance_rx: f64,
    check_time: Instant,

    prev_seq: Option<u16>,
}

impl State {
    fn new(mode: JitterMode) -> Self {
        Self {
            mode,
            frame_ms: mode.default_frame_ms(),
            buffer: VecDeque::new(),
            stat: StatMeter::new(STAT_WINDOW),
            buffering: true,
            reserve_count: mode.reserve_bounds().0,
            prev_rx: None,
            state_rx: mode.default_frame_ms() as f64,
            covariance_rx: 1.0,
            check_time: Instant::now(),
            prev_seq: None,
        }
    }

    /// Scalar Kalman correction of the mean arrival interval; measurement
    /// noise comes from the recent deviation window.
    fn kalman_correct(&mut self, interval_ms: f64) -> f64 {
        let r = (self.stat.stddev() * self.stat.stddev()).max(1.0);

        let predicted_covariance = self.covariance_rx + KALMAN_Q;
        let gain = predicted_covariance / (predicted_covariance + r);
        self.state_rx += gain * (interval_ms - self.state_rx);
        self.covariance_rx = (1.0 - gain) * predicted_covariance;

        self.state_rx
    }

    fn recompute_reserve(&mut self, now: Instant) {
        if now.duration_since(self.check_time).as_millis() < CHECK_INTERVAL_MS {
            return;
        }
        self.check_time = now;

        let (min, max) = self.mode.reserve_bounds();
        let wanted = (K_JITTER * self.stat.stddev() / self.frame_ms as f64).ceil() as usize;
        self.reserve_count = wanted.clamp(min, max);
    }
}

/// Sequence order with 16-bit wrap: `a` strictly before `b`.
fn seq_before(a: u16, b: u16) -> bool {
    (b.wrapping_sub(a) as i16) > 0
}

/// Reorder buffer between network and renderer. Producers push from the
/// network thread via `send()`; the renderer pulls on its own timer via
/// `get_frame()`.
pub struct JitterBuffer {
    state: Mutex<State>,
    runned: AtomicBool,
    name: Mutex<String>,
}

impl JitterBuffer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::new(JitterMode::Sound)),
            runned: AtomicBool::new(false),
            name: Mutex::new(String::new()),
        }
    }

    pub fn start(&self, mode: JitterMode, name: &str) {
        let mut state = self.state.lock();
        *state = State::new(mode);
        *self.name.lock() = name.to_owned();
        self.runned.store(true, Ordering::SeqCst);
        tracing::info!("jitter buffer [{}] started in {:?} mode", name, mode);
    }

    /// Idempotent; a stopped buffer ignores inserts and returns no frames.
    pub fn stop(&self) {
        if !self.runned.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock();
        state.buffer.clear();
        state.stat.clear();
        tracing::info!("jitter buffer [{}] stopped", self.name.lock());
    }

    pub fn is_started(&self) -> bool {
        self.runned.load(Ordering::SeqCst)
    }

    pub fn set_frame_duration(&self, ms: u32) {
        if ms > 0 {
            self.state.lock().frame_ms = ms;
        }
    }

    pub fn reserve_count(&self) -> usize {
        self.state.lock().reserve_count
    }

    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next frame for the renderer, or `None` while pre-buffering. On a
    /// single missing audio sequence a synthesized empty packet is emitted
    /// in its place so the decoder's concealment can fill the gap.
    pub fn get_frame(&self) -> Option<OwnedRtpPacket> {
        if !self.runned.load(Ordering::SeqCst) {
            return None;
        }

        let mut state = self.state.lock();

        if state.buffer.is_empty() {
            state.buffering = true;
            return None;
        }
        if state.buffering {
            if state.buffer.len() < state.reserve_count {
                return None;
            }
            state.buffering = false;
        }

        let front_seq = state.buffer.front().map(|p| p.header.sequence)?;

        if let Some(prev) = state.prev_seq {
            let gap = front_seq.wrapping_sub(prev) as i16;
            if gap == 2 && state.mode == JitterMode::Sound {
                // Exactly one frame missing: hand the decoder an empty
                // stand-in and keep the real packet queued for next pull.
                let front = state.buffer.front()?;
                let mut header = front.header.clone();
                header.sequence = prev.wrapping_add(1);
                let payload_type = front.payload_type;

                state.prev_seq = Some(header.sequence);
                tracing::debug!(
                    "jitter buffer [{}]: concealing lost seq {}",
                    self.name.lock(),
                    header.sequence
                );
                return Some(OwnedRtpPacket::empty(header, payload_type));
            }
        }

        let packet = state.buffer.pop_front()?;
        state.prev_seq = Some(packet.header.sequence);
        Some(packet)
    }

    /// Peek at the next frame without consuming it.
    pub fn read_frame(&self) -> Option<OwnedRtpPacket> {
        if !self.runned.load(Ordering::SeqCst) {
            return None;
        }

        let state = self.state.lock();
        state.buffer.front().map(|front| {
            OwnedRtpPacket::new(front.header.clone(), &front.payload, front.payload_type)
        })
    }
}

impl Default for JitterBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for JitterBuffer {
    fn send(&self, packet: &RtpPacket<'_>, _addr: Option<&Address>) {
        if !self.runned.load(Ordering::SeqCst) {
            return;
        }

        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(prev_rx) = state.prev_rx {
            let interval = now.duration_since(prev_rx).as_secs_f64() * 1000.0;
            let estimate = state.kalman_correct(interval);
            let deviation = (interval - estimate).abs();
            state.stat.push(deviation);
        }
        state.prev_rx = Some(now);
        state.recompute_reserve(now);

        let sequence = packet.header.sequence;

        // Late packet: the renderer has moved past it.
        if let Some(prev) = state.prev_seq {
            if !seq_before(prev, sequence) {
                tracing::trace!(
                    "jitter buffer [{}]: dropping late seq {}",
                    self.name.lock(),
                    sequence
                );
                return;
            }
        }

        if state.buffer.len() >= CAPACITY {
            tracing::warn!(
                "jitter buffer [{}]: full, dropping seq {}",
                self.name.lock(),
                sequence
            );
            return;
        }

        // Binary-search insertion keeps the deque ordered by sequence.
        let position = state
            .buffer
            .partition_point(|queued| seq_before(queued.header.sequence, sequence));

        if let Some(queued) = state.buffer.get(position) {
            if queued.header.sequence == sequence {
                return; // duplicate
            }
        }

        let owned = OwnedRtpPacket::new(
            packet.header.clone(),
            packet.payload,
            PayloadType::from_u8(packet.header.payload_type),
        );
        state.buffer.insert(position, owned);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RtpHeader;

    fn feed(jb: &JitterBuffer, sequence: u16) {
        let header = RtpHeader {
            payload_type: PayloadType::Opus as u8,
            sequence,
            timestamp: u32::from(sequence) * 960,
            ssrc: 1,
            ..Default::default()
        };
        jb.send(&RtpPacket::new(header, b"frame"), None);
    }

    fn drain(jb: &JitterBuffer) -> Vec<u16> {
        let mut out = Vec::new();
        while let Some(packet) = jb.get_frame() {
            out.push(packet.header.sequence);
        }
        out
    }

    #[test]
    fn delivers_across_sequence_wrap() {
        let jb = JitterBuffer::new();
        jb.start(JitterMode::Sound, "wrap");

        for seq in [65534u16, 65535, 0, 1, 2] {
            feed(&jb, seq);
        }

        assert_eq!(drain(&jb), vec![65534, 65535, 0, 1, 2]);
    }

    #[test]
    fn reorders_and_conceals_single_audio_gap() {
        let jb = JitterBuffer::new();
        jb.start(JitterMode::Sound, "reorder");

        for seq in [10u16, 12, 11, 14] {
            feed(&jb, seq);
        }

        let mut delivered = Vec::new();
        let mut synthetic = Vec::new();
        while let Some(packet) = jb.get_frame() {
            delivered.push(packet.header.sequence);
            if packet.payload.is_empty() {
                synthetic.push(packet.header.sequence);
            }
        }

        assert_eq!(delivered, vec![10, 11, 12, 13, 14]);
        assert_eq!(synthetic, vec![13]);
    }

    #[test]
    fn video_mode_leaves_gaps_to_the_decoder() {
        let jb = JitterBuffer::new();
        jb.start(JitterMode::Video, "video");

        for seq in [20u16, 22] {
            feed(&jb, seq);
        }

        assert_eq!(drain(&jb), vec![20, 22]);
    }

    #[test]
    fn drops_late_and_duplicate_packets() {
        let jb = JitterBuffer::new();
        jb.start(JitterMode::Sound, "late");

        feed(&jb, 5);
        feed(&jb, 5); // duplicate while queued
        feed(&jb, 6);
        assert_eq!(jb.len(), 2);

        assert_eq!(drain(&jb), vec![5, 6]);

        feed(&jb, 4); // late: renderer already past it
        assert_eq!(jb.len(), 0);
    }

    #[test]
    fn buffers_until_reserve_is_met() {
        let jb = JitterBuffer::new();
        jb.start(JitterMode::Sound, "reserve");

        // Sound-mode minimum reserve is two frames.
        feed(&jb, 1);
        assert!(jb.get_frame().is_none());

        feed(&jb, 2);
        assert_eq!(jb.get_frame().unwrap().header.sequence, 1);
    }

    #[test]
    fn read_frame_peeks_without_consuming() {
        let jb = JitterBuffer::new();
        jb.start(JitterMode::Sound, "peek");

        feed(&jb, 30);
        feed(&jb, 31);

        assert_eq!(jb.read_frame().unwrap().header.sequence, 30);
        assert_eq!(jb.len(), 2);
        assert_eq!(jb.get_frame().unwrap().header.sequence, 30);
    }

    #[test]
    fn stopped_buffer_is_inert() {
        let jb = JitterBuffer::new();
        jb.start(JitterMode::Sound, "stopped");
        feed(&jb, 1);
        feed(&jb, 2);

        jb.stop();
        jb.stop(); // idempotent

        feed(&jb, 3);
        assert!(jb.get_frame().is_none());
        assert_eq!(jb.len(), 0);
    }

    #[test]
    fn reserve_stays_within_mode_bounds() {
        let jb = JitterBuffer::new();
        jb.start(JitterMode::Video, "bounds");

        for seq in 0..200u16 {
            feed(&jb, seq);
        }

        let reserve = jb.reserve_count();
        assert!((1..=12).contains(&reserve));
    }
}
