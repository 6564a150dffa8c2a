//! Sequence-ordered jitter buffer with packet-loss concealment.
//!
//! Inbound frames arrive tagged `(seq, timestamp)` and possibly out of
//! order. The buffer reassembles them into an ordered pull stream:
//!
//! - duplicates are detected by seq and dropped silently;
//! - frames later than the reordering window are discarded and counted;
//! - a gap still open once enough newer frames have queued up is
//!   concealed with a synthetic frame (tail repetition, linear fade),
//!   at most `max_concealment_frames` in a row before forced silence;
//! - the adaptive target delay floats between the configured bounds,
//!   rising on observed reordering and decaying on stable arrivals.
//!
//! Identity law: a gap-free in-order input sequence is emitted
//! byte-for-byte unchanged.

use std::collections::BTreeMap;

use invorto_domain::audio::AudioFrame;
use invorto_domain::config::JitterConfig;

/// Counters exposed for diagnostics and `congestion` accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JitterStats {
    pub delivered: u64,
    pub duplicates_dropped: u64,
    pub late_dropped: u64,
    pub concealed: u64,
    pub silence_inserted: u64,
}

pub struct JitterBuffer {
    cfg: JitterConfig,
    /// Frames waiting for delivery, keyed by seq.
    pending: BTreeMap<u64, AudioFrame>,
    /// Next seq to hand downstream. Latched by the first frame pushed.
    next_seq: Option<u64>,
    /// Highest seq seen so far (drives the reordering window).
    max_seen: Option<u64>,
    /// Tail of the last delivered frame, kept for concealment.
    last_payload: Vec<u8>,
    last_timestamp_end: u64,
    consecutive_synthetic: u32,
    /// Adaptive hold-back, in frames, derived from the target delay.
    target_delay_ms: f64,
    /// Duration of a nominal frame, learned from delivered frames.
    frame_ms: u64,
    sample_rate_hz: u32,
    stats: JitterStats,
}

impl JitterBuffer {
    pub fn new(cfg: JitterConfig, sample_rate_hz: u32) -> Self {
        let target = cfg.min_delay_ms as f64;
        Self {
            cfg,
            pending: BTreeMap::new(),
            next_seq: None,
            max_seen: None,
            last_payload: Vec::new(),
            last_timestamp_end: 0,
            consecutive_synthetic: 0,
            target_delay_ms: target,
            frame_ms: 20,
            sample_rate_hz,
            stats: JitterStats::default(),
        }
    }

    pub fn stats(&self) -> JitterStats {
        self.stats
    }

    /// Current adaptive target delay in milliseconds.
    pub fn target_delay_ms(&self) -> u64 {
        self.target_delay_ms as u64
    }

    /// Accept an inbound frame. Never blocks and never fails; frames
    /// outside the policy are counted and dropped.
    pub fn push(&mut self, frame: AudioFrame) {
        let next = *self.next_seq.get_or_insert(frame.seq);

        // Learn the nominal frame duration from real traffic.
        let samples = frame.sample_count() as u64;
        if samples > 0 {
            self.frame_ms = (samples * 1000 / self.sample_rate_hz as u64).max(10);
        }

        // Late: already delivered (or concealed) past this seq.
        if frame.seq < next {
            self.stats.late_dropped += 1;
            return;
        }

        // Late beyond the reordering window.
        if let Some(max_seen) = self.max_seen {
            if max_seen > frame.seq && max_seen - frame.seq > self.cfg.reorder_window {
                self.stats.late_dropped += 1;
                return;
            }
            // Out-of-order arrival: raise the target delay.
            if frame.seq < max_seen {
                self.target_delay_ms =
                    (self.target_delay_ms + self.frame_ms as f64).min(self.cfg.max_delay_ms as f64);
            } else {
                // Stable arrival: decay toward the floor.
                self.target_delay_ms =
                    (self.target_delay_ms - 0.5).max(self.cfg.min_delay_ms as f64);
            }
        }
        self.max_seen = Some(self.max_seen.map_or(frame.seq, |m| m.max(frame.seq)));

        // Duplicate: seq already queued.
        if self.pending.contains_key(&frame.seq) {
            self.stats.duplicates_dropped += 1;
            return;
        }

        self.pending.insert(frame.seq, frame);
    }

    /// Pull the next ordered frame, if one is deliverable.
    ///
    /// Returns `None` while the buffer is still waiting on the wire —
    /// either the next frame in sequence or enough newer traffic to
    /// declare the gap lost.
    pub fn pop_ready(&mut self) -> Option<AudioFrame> {
        let next = self.next_seq?;

        if let Some(frame) = self.pending.remove(&next) {
            self.next_seq = Some(next + 1);
            self.consecutive_synthetic = 0;
            self.last_payload = frame.payload.clone();
            self.last_timestamp_end = frame.timestamp + frame.sample_count() as u64;
            self.stats.delivered += 1;
            return Some(frame);
        }

        // Gap at the head. Conceal only once the hold-back worth of
        // newer frames has arrived, otherwise keep waiting.
        let max_seen = self.max_seen?;
        if max_seen <= next {
            return None;
        }
        let holdback_frames = (self.target_delay_ms as u64 / self.frame_ms).max(1);
        if max_seen - next < holdback_frames {
            return None;
        }

        let frame = self.conceal(next);
        self.next_seq = Some(next + 1);
        self.stats.delivered += 1;
        Some(frame)
    }

    /// Drain everything still queued, concealing interior gaps. Used at
    /// end of stream.
    pub fn drain(&mut self) -> Vec<AudioFrame> {
        let mut out = Vec::new();
        while let Some(next) = self.next_seq {
            match self.max_seen {
                Some(max_seen) if next <= max_seen => {}
                _ => break,
            }
            if let Some(frame) = self.pending.remove(&next) {
                self.consecutive_synthetic = 0;
                self.last_payload = frame.payload.clone();
                self.last_timestamp_end = frame.timestamp + frame.sample_count() as u64;
                self.stats.delivered += 1;
                out.push(frame);
            } else {
                let frame = self.conceal(next);
                self.stats.delivered += 1;
                out.push(frame);
            }
            self.next_seq = Some(next + 1);
        }
        out
    }

    // ── Concealment ─────────────────────────────────────────────────

    /// Build a synthetic frame for a lost seq: repeat the tail of the
    /// previous frame with a linear fade to silence. After
    /// `max_concealment_frames` in a row, insert plain silence instead.
    fn conceal(&mut self, seq: u64) -> AudioFrame {
        let samples = self
            .sample_rate_hz
            .checked_mul(self.frame_ms as u32)
            .map(|v| v / 1000)
            .unwrap_or(320) as usize;

        if self.consecutive_synthetic >= self.cfg.max_concealment_frames
            || self.last_payload.is_empty()
        {
            self.stats.silence_inserted += 1;
            self.consecutive_synthetic += 1;
            let frame = AudioFrame::silence(seq, self.last_timestamp_end, samples);
            self.last_timestamp_end += samples as u64;
            return frame;
        }

        // Tail repetition: tile the last quarter of the previous frame.
        let tail_len = (self.last_payload.len() / 4).max(2) & !1usize;
        let tail = &self.last_payload[self.last_payload.len() - tail_len..];
        let mut payload = Vec::with_capacity(samples * 2);
        while payload.len() < samples * 2 {
            let take = tail.len().min(samples * 2 - payload.len());
            payload.extend_from_slice(&tail[..take]);
        }

        // Linear fade to silence across the frame.
        let total = (payload.len() / 2).max(1);
        for (i, chunk) in payload.chunks_exact_mut(2).enumerate() {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            let gain = 1.0 - (i as f32 / total as f32);
            let faded = (sample as f32 * gain) as i16;
            chunk.copy_from_slice(&faded.to_le_bytes());
        }

        self.stats.concealed += 1;
        self.consecutive_synthetic += 1;

        let mut frame = AudioFrame::new(seq, self.last_timestamp_end, payload);
        frame.synthetic = true;
        self.last_timestamp_end += samples as u64;
        self.last_payload = frame.payload.clone();
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u64, fill: i16) -> AudioFrame {
        let samples = 320usize; // 20 ms @ 16 kHz
        let mut payload = Vec::with_capacity(samples * 2);
        for _ in 0..samples {
            payload.extend_from_slice(&fill.to_le_bytes());
        }
        AudioFrame::new(seq, seq * samples as u64, payload)
    }

    fn buffer() -> JitterBuffer {
        JitterBuffer::new(JitterConfig::default(), 16_000)
    }

    #[test]
    fn in_order_input_passes_through_identically() {
        let mut jb = buffer();
        let input: Vec<AudioFrame> = (0..20).map(|i| frame(i, i as i16 * 100)).collect();
        let mut output = Vec::new();
        for f in &input {
            jb.push(f.clone());
            while let Some(out) = jb.pop_ready() {
                output.push(out);
            }
        }
        assert_eq!(output, input);
        assert_eq!(jb.stats().delivered, 20);
        assert_eq!(jb.stats().concealed, 0);
    }

    #[test]
    fn reordered_frames_are_resequenced() {
        let mut jb = buffer();
        jb.push(frame(0, 1));
        assert_eq!(jb.pop_ready().unwrap().seq, 0);

        // 2 arrives before 1.
        jb.push(frame(2, 3));
        assert!(jb.pop_ready().is_none());
        jb.push(frame(1, 2));
        assert_eq!(jb.pop_ready().unwrap().seq, 1);
        assert_eq!(jb.pop_ready().unwrap().seq, 2);
        assert_eq!(jb.stats().concealed, 0);
    }

    #[test]
    fn duplicates_dropped_silently() {
        let mut jb = buffer();
        jb.push(frame(0, 1));
        jb.push(frame(1, 2));
        jb.push(frame(1, 2));
        assert_eq!(jb.pop_ready().unwrap().seq, 0);
        assert_eq!(jb.pop_ready().unwrap().seq, 1);
        assert!(jb.pop_ready().is_none());
        assert_eq!(jb.stats().duplicates_dropped, 1);
    }

    #[test]
    fn late_beyond_window_dropped_and_counted() {
        let mut jb = buffer();
        jb.push(frame(0, 1));
        assert_eq!(jb.pop_ready().unwrap().seq, 0);
        // Jump far ahead; seq 2 is now > window behind.
        for i in 13..16 {
            jb.push(frame(i, 0));
        }
        jb.push(frame(2, 0));
        assert_eq!(jb.stats().late_dropped, 1);
    }

    #[test]
    fn gap_concealed_after_holdback() {
        let mut jb = buffer();
        jb.push(frame(0, 1000));
        assert_eq!(jb.pop_ready().unwrap().seq, 0);

        // Frame 1 lost; push enough newer traffic to close the gap.
        for i in 2..6 {
            jb.push(frame(i, 500));
        }
        let concealed = jb.pop_ready().expect("gap should be concealed");
        assert_eq!(concealed.seq, 1);
        assert!(concealed.synthetic);
        // Fade ends near silence.
        let samples = concealed.samples();
        assert!(samples[samples.len() - 1].abs() < 50);
        assert_eq!(jb.pop_ready().unwrap().seq, 2);
    }

    #[test]
    fn at_most_three_consecutive_concealments_then_silence() {
        let mut jb = buffer();
        jb.push(frame(0, 1000));
        assert_eq!(jb.pop_ready().unwrap().seq, 0);

        // Frames 1..=5 lost.
        for i in 6..12 {
            jb.push(frame(i, 500));
        }
        let mut synthetic = Vec::new();
        for _ in 1..=5 {
            synthetic.push(jb.pop_ready().expect("concealment due"));
        }
        assert!(synthetic.iter().all(|f| f.synthetic));
        let stats = jb.stats();
        assert_eq!(stats.concealed, 3);
        assert_eq!(stats.silence_inserted, 2);
        // The 4th synthetic frame is pure silence.
        assert!(synthetic[3].samples().iter().all(|&s| s == 0));
    }

    #[test]
    fn target_delay_rises_on_reordering_and_stays_bounded() {
        let mut jb = buffer();
        let initial = jb.target_delay_ms();
        // Alternate late arrivals to provoke adaptation.
        jb.push(frame(0, 0));
        for i in 0..50u64 {
            jb.push(frame(i * 2 + 2, 0));
            jb.push(frame(i * 2 + 1, 0));
        }
        assert!(jb.target_delay_ms() > initial);
        assert!(jb.target_delay_ms() <= JitterConfig::default().max_delay_ms);
    }

    #[test]
    fn drain_flushes_remaining_frames() {
        let mut jb = buffer();
        for i in 0..3 {
            jb.push(frame(i, 7));
        }
        // Leave a trailing gap: frame 3 missing, 4 present.
        jb.push(frame(4, 9));
        let drained = jb.drain();
        let seqs: Vec<u64> = drained.iter().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        assert!(drained[3].synthetic);
    }
}
