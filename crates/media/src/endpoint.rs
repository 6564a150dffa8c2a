//! Endpointing: turn-boundary decisions from VAD frames and committed
//! ASR finals.
//!
//! Start-of-speech opens after `speech_on_frames` consecutive
//! speech-confident frames. End-of-speech closes once contiguous
//! silence reaches `silence_ms` with at least `min_words` committed,
//! or unconditionally at `hard_cap_ms` of silence.

use invorto_domain::config::EndpointingConfig;

/// Why a turn was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Enough silence with enough committed words.
    Silence,
    /// The hard silence cap expired regardless of word count.
    HardCap,
}

/// Boundary decision for one observed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnSignal {
    None,
    StartOfSpeech,
    EndOfSpeech(EndReason),
}

pub struct Endpointer {
    cfg: EndpointingConfig,
    in_turn: bool,
    consecutive_speech: u32,
    silence_ms: u64,
    committed_words: usize,
}

impl Endpointer {
    pub fn new(cfg: EndpointingConfig) -> Self {
        Self {
            cfg,
            in_turn: false,
            consecutive_speech: 0,
            silence_ms: 0,
            committed_words: 0,
        }
    }

    pub fn in_turn(&self) -> bool {
        self.in_turn
    }

    pub fn committed_words(&self) -> usize {
        self.committed_words
    }

    /// Record words committed by an ASR final for the current turn.
    pub fn commit_words(&mut self, words: usize) {
        self.committed_words += words;
    }

    /// Observe one frame's VAD decision. `frame_ms` is the frame's
    /// duration on the sample clock.
    pub fn observe(&mut self, speaking: bool, frame_ms: u64) -> TurnSignal {
        if !self.in_turn {
            if speaking {
                self.consecutive_speech += 1;
                if self.consecutive_speech >= self.cfg.speech_on_frames {
                    self.in_turn = true;
                    self.silence_ms = 0;
                    self.committed_words = 0;
                    return TurnSignal::StartOfSpeech;
                }
            } else {
                self.consecutive_speech = 0;
            }
            return TurnSignal::None;
        }

        if speaking {
            self.silence_ms = 0;
            return TurnSignal::None;
        }

        self.silence_ms += frame_ms;

        if self.silence_ms >= self.cfg.hard_cap_ms {
            self.close();
            return TurnSignal::EndOfSpeech(EndReason::HardCap);
        }
        if self.silence_ms >= self.cfg.silence_ms && self.committed_words >= self.cfg.min_words {
            self.close();
            return TurnSignal::EndOfSpeech(EndReason::Silence);
        }
        TurnSignal::None
    }

    /// Force the turn closed (used when the agent completes a reply
    /// without interruption).
    pub fn close(&mut self) {
        self.in_turn = false;
        self.consecutive_speech = 0;
        self.silence_ms = 0;
    }
}
