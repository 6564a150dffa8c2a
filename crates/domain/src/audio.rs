//! PCM audio frame types shared by the ingress pipeline and the adapters.

use serde::{Deserialize, Serialize};

/// Wire encoding of an audio payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    #[default]
    Pcm16,
    Opus,
    Mulaw,
}

/// Supported sample rates for inbound PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    #[serde(rename = "8000")]
    Hz8000,
    #[serde(rename = "16000")]
    Hz16000,
}

impl SampleRate {
    pub fn as_hz(self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8_000,
            SampleRate::Hz16000 => 16_000,
        }
    }

    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            8_000 => Some(SampleRate::Hz8000),
            16_000 => Some(SampleRate::Hz16000),
            _ => None,
        }
    }

    /// Number of samples in `ms` milliseconds at this rate.
    pub fn samples_for_ms(self, ms: u32) -> usize {
        (self.as_hz() as usize * ms as usize) / 1000
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        SampleRate::Hz16000
    }
}

/// One 10–40 ms mono PCM16 frame.
///
/// `seq` is monotonically increasing per direction within a session;
/// `timestamp` is the sample-clock offset of the first sample. Frames
/// synthesized by packet-loss concealment carry `synthetic = true`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub seq: u64,
    pub timestamp: u64,
    pub payload: Vec<u8>,
    pub synthetic: bool,
    pub encoding: AudioEncoding,
}

impl AudioFrame {
    pub fn new(seq: u64, timestamp: u64, payload: Vec<u8>) -> Self {
        Self {
            seq,
            timestamp,
            payload,
            synthetic: false,
            encoding: AudioEncoding::Pcm16,
        }
    }

    /// Number of PCM16 samples in the payload.
    pub fn sample_count(&self) -> usize {
        self.payload.len() / 2
    }

    /// Decode the payload as little-endian i16 samples.
    pub fn samples(&self) -> Vec<i16> {
        self.payload
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    /// Frame duration in milliseconds at the given rate.
    pub fn duration_ms(&self, rate: SampleRate) -> u64 {
        (self.sample_count() as u64 * 1000) / rate.as_hz() as u64
    }

    /// Build a silent (all-zero) frame of `samples` PCM16 samples.
    pub fn silence(seq: u64, timestamp: u64, samples: usize) -> Self {
        Self {
            seq,
            timestamp,
            payload: vec![0u8; samples * 2],
            synthetic: true,
            encoding: AudioEncoding::Pcm16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_rate_conversions() {
        assert_eq!(SampleRate::Hz16000.as_hz(), 16_000);
        assert_eq!(SampleRate::from_hz(8_000), Some(SampleRate::Hz8000));
        assert_eq!(SampleRate::from_hz(44_100), None);
        assert_eq!(SampleRate::Hz16000.samples_for_ms(20), 320);
    }

    #[test]
    fn frame_sample_decoding() {
        // Two samples: 1 and -1, little-endian.
        let frame = AudioFrame::new(0, 0, vec![0x01, 0x00, 0xff, 0xff]);
        assert_eq!(frame.sample_count(), 2);
        assert_eq!(frame.samples(), vec![1, -1]);
        assert_eq!(frame.duration_ms(SampleRate::Hz16000), 0);
    }

    #[test]
    fn silence_frame_is_synthetic() {
        let frame = AudioFrame::silence(7, 1600, 320);
        assert!(frame.synthetic);
        assert_eq!(frame.sample_count(), 320);
        assert!(frame.samples().iter().all(|&s| s == 0));
        assert_eq!(frame.duration_ms(SampleRate::Hz16000), 20);
    }
}
