//! Energy meter: per-frame RMS in dBFS, adaptive noise floor, and a
//! hysteresis-gated VAD confidence.
//!
//! The meter keeps an exponentially weighted noise floor updated on
//! non-speech frames, and compares each frame's energy (plus a coarse
//! voice-band/total ratio) against `speech_on` / `speech_off` offsets
//! above that floor. Separate on/off thresholds stop the decision from
//! flapping at the boundary.

use invorto_domain::audio::AudioFrame;
use invorto_domain::config::VadConfig;

/// Floor used when a frame is pure digital silence.
const SILENCE_DB: f32 = -96.0;

/// Per-frame analysis result.
#[derive(Debug, Clone, Copy)]
pub struct VadFrame {
    /// Frame energy in dBFS.
    pub rms_db: f32,
    /// Current adaptive noise floor in dBFS.
    pub noise_floor_db: f32,
    /// Voice-band energy over total energy, in [0, 1].
    pub band_ratio: f32,
    /// Speech confidence in [0, 1].
    pub confidence: f32,
    /// Hysteresis-gated speech decision.
    pub speaking: bool,
}

pub struct EnergyMeter {
    cfg: VadConfig,
    noise_floor_db: f32,
    speaking: bool,
    /// Sample-clock time of the last emitted `vad.update`.
    last_update_at: Option<u64>,
    sample_rate_hz: u32,
}

impl EnergyMeter {
    pub fn new(cfg: VadConfig, sample_rate_hz: u32) -> Self {
        Self {
            cfg,
            noise_floor_db: -60.0,
            speaking: false,
            last_update_at: None,
            sample_rate_hz,
        }
    }

    /// Analyze one frame and update the meter state.
    pub fn process(&mut self, frame: &AudioFrame) -> VadFrame {
        let samples = frame.samples();
        let rms_db = rms_dbfs(&samples);
        let band_ratio = voice_band_ratio(&samples);

        let delta = rms_db - self.noise_floor_db;

        // Hysteresis: separate thresholds for speech-on and speech-off.
        if self.speaking {
            if delta < self.cfg.speech_off_db {
                self.speaking = false;
            }
        } else if delta >= self.cfg.speech_on_db && band_ratio >= self.cfg.voice_band_ratio_min {
            self.speaking = true;
        }

        // The floor only tracks non-speech frames, so sustained speech
        // cannot drag it upward.
        if !self.speaking {
            self.noise_floor_db +=
                self.cfg.noise_floor_alpha * (rms_db - self.noise_floor_db);
            self.noise_floor_db = self.noise_floor_db.clamp(SILENCE_DB, 0.0);
        }

        let span = (self.cfg.speech_on_db - self.cfg.speech_off_db).max(0.1);
        let mut confidence = ((delta - self.cfg.speech_off_db) / span).clamp(0.0, 1.0);
        if band_ratio < self.cfg.voice_band_ratio_min && self.cfg.voice_band_ratio_min > 0.0 {
            confidence *= band_ratio / self.cfg.voice_band_ratio_min;
        }

        VadFrame {
            rms_db,
            noise_floor_db: self.noise_floor_db,
            band_ratio,
            confidence,
            speaking: self.speaking,
        }
    }

    /// Whether a `vad.update` event is due for a frame at `timestamp`
    /// (sample clock). Throttles emission to `update_throttle_ms`.
    pub fn update_due(&mut self, timestamp: u64) -> bool {
        let throttle_samples =
            self.cfg.update_throttle_ms * self.sample_rate_hz as u64 / 1000;
        match self.last_update_at {
            Some(last) if timestamp.saturating_sub(last) < throttle_samples => false,
            _ => {
                self.last_update_at = Some(timestamp);
                true
            }
        }
    }
}

/// RMS of normalized PCM16 samples, in dBFS.
fn rms_dbfs(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return SILENCE_DB;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let x = s as f64 / 32768.0;
            x * x
        })
        .sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    if rms <= 0.0 {
        SILENCE_DB
    } else {
        (20.0 * rms.log10() as f32).max(SILENCE_DB)
    }
}

/// Coarse two-band split: a 4-sample boxcar low-pass approximates the
/// voice band; the ratio of its energy to the total separates tonal
/// speech from broadband noise.
fn voice_band_ratio(samples: &[i16]) -> f32 {
    if samples.len() < 4 {
        return 0.0;
    }
    let mut total = 0.0f64;
    let mut voice = 0.0f64;
    for w in samples.windows(4) {
        let avg = w.iter().map(|&s| s as f64).sum::<f64>() / 4.0;
        let mid = w[1] as f64;
        total += mid * mid;
        voice += avg * avg;
    }
    if total <= 0.0 {
        0.0
    } else {
        ((voice / total) as f32).clamp(0.0, 1.0)
    }
}
