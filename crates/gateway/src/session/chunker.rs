//! Chunking of LLM deltas into TTS-sized text pieces.
//!
//! Deltas accumulate until a sentence terminator, a breath pause in an
//! already-long buffer, or the character ceiling — whichever comes
//! first. Trailing text is flushed when the stream finishes.

/// Characters that end a sentence.
const SENTENCE_ENDS: [char; 3] = ['.', '!', '?'];
/// Characters that mark a natural breath pause.
const BREATH_PAUSES: [char; 3] = [',', ';', ':'];

pub struct TtsChunker {
    buf: String,
    max_chars: usize,
}

impl TtsChunker {
    pub fn new(max_chars: usize) -> Self {
        Self {
            buf: String::new(),
            max_chars: max_chars.max(1),
        }
    }

    /// Feed one delta; returns every chunk that became ready.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buf.push_str(delta);
        let mut out = Vec::new();
        while let Some(chunk) = self.next_ready() {
            out.push(chunk);
        }
        out
    }

    /// Flush whatever is left (call on `llm.final`).
    pub fn flush(&mut self) -> Option<String> {
        let rest = self.buf.trim();
        if rest.is_empty() {
            self.buf.clear();
            return None;
        }
        let rest = rest.to_string();
        self.buf.clear();
        Some(rest)
    }

    fn next_ready(&mut self) -> Option<String> {
        // Sentence end followed by whitespace (or buffer end) wins.
        let chars: Vec<(usize, char)> = self.buf.char_indices().collect();
        for (pos, (i, c)) in chars.iter().enumerate() {
            let at_boundary = match chars.get(pos + 1) {
                Some((_, next)) => next.is_whitespace(),
                None => false, // trailing terminator may still grow ("3.5")
            };
            if SENTENCE_ENDS.contains(c) && at_boundary {
                return Some(self.take_through(*i + c.len_utf8()));
            }
            // Breath pause only once the buffer is already substantial.
            if BREATH_PAUSES.contains(c) && at_boundary && *i + 1 >= self.max_chars / 2 {
                return Some(self.take_through(*i + c.len_utf8()));
            }
        }

        // Ceiling: emit up to the last whitespace before the limit.
        if self.buf.chars().count() >= self.max_chars {
            let cut = self
                .buf
                .char_indices()
                .take_while(|(i, _)| *i < self.max_chars)
                .filter(|(_, c)| c.is_whitespace())
                .map(|(i, _)| i)
                .last()
                .unwrap_or_else(|| {
                    // No whitespace: cut at the nearest char boundary.
                    let mut cut = self.max_chars.min(self.buf.len());
                    while !self.buf.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    cut
                });
            // Never emit an empty chunk.
            if cut > 0 {
                return Some(self.take_through(cut));
            }
        }
        None
    }

    fn take_through(&mut self, byte_idx: usize) -> String {
        let rest = self.buf.split_off(byte_idx);
        let chunk = std::mem::replace(&mut self.buf, rest);
        self.buf = self.buf.trim_start().to_string();
        chunk.trim().to_string()
    }
}
