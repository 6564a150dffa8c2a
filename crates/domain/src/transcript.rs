//! Transcript hypotheses produced by the ASR adapter.

use serde::{Deserialize, Serialize};

/// One ASR hypothesis, interim or final.
///
/// Within a turn, the last final emitted for a given `start_sample`
/// replaces every earlier interim with the same start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptHypothesis {
    pub text: String,
    /// Recognizer confidence in [0, 1].
    pub confidence: f32,
    pub is_final: bool,
    /// Set when a final lands below the configured confidence floor.
    /// Low-confidence finals are reported, never dropped.
    #[serde(default)]
    pub low_confidence: bool,
    /// Sample-clock offset where the utterance began.
    pub start_sample: u64,
    /// Sample-clock offset where the utterance ended (so far).
    pub end_sample: u64,
}

impl TranscriptHypothesis {
    pub fn interim(text: impl Into<String>, confidence: f32, start: u64, end: u64) -> Self {
        Self {
            text: text.into(),
            confidence,
            is_final: false,
            low_confidence: false,
            start_sample: start,
            end_sample: end,
        }
    }

    pub fn final_(text: impl Into<String>, confidence: f32, start: u64, end: u64) -> Self {
        Self {
            text: text.into(),
            confidence,
            is_final: true,
            low_confidence: false,
            start_sample: start,
            end_sample: end,
        }
    }

    /// Whether this hypothesis supersedes `earlier` under the
    /// interim-replacement law.
    pub fn replaces(&self, earlier: &TranscriptHypothesis) -> bool {
        self.is_final && !earlier.is_final && self.start_sample == earlier.start_sample
    }

    /// Number of whitespace-separated words (used by endpointing).
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_replaces_interims_with_same_start() {
        let interim = TranscriptHypothesis::interim("hello th", 0.4, 0, 8_000);
        let final_ = TranscriptHypothesis::final_("hello there", 0.92, 0, 16_000);
        assert!(final_.replaces(&interim));
    }

    #[test]
    fn final_does_not_replace_other_turns() {
        let interim = TranscriptHypothesis::interim("yes", 0.5, 32_000, 36_000);
        let final_ = TranscriptHypothesis::final_("hello", 0.9, 0, 16_000);
        assert!(!final_.replaces(&interim));
    }

    #[test]
    fn interim_never_replaces() {
        let a = TranscriptHypothesis::interim("he", 0.3, 0, 4_000);
        let b = TranscriptHypothesis::interim("hel", 0.35, 0, 6_000);
        assert!(!b.replaces(&a));
    }

    #[test]
    fn word_counting() {
        let h = TranscriptHypothesis::final_("book me a table", 0.9, 0, 100);
        assert_eq!(h.word_count(), 4);
        assert_eq!(TranscriptHypothesis::final_("", 0.9, 0, 0).word_count(), 0);
    }
}
