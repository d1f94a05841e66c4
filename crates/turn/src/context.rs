//! Rolling window of recent user utterances.

use std::collections::VecDeque;

use crate::signals::word_count;

/// Default number of utterances kept for biasing.
pub const DEFAULT_CONTEXT_CAPACITY: usize = 10;

/// Mean utterance length (words) above which a much shorter utterance is
/// treated as a likely mid-thought pause.
const LONG_SPEAKER_MEAN_WORDS: f32 = 8.0;

/// Mean utterance length (words) at or below which the speaker is terse.
const TERSE_SPEAKER_MEAN_WORDS: f32 = 4.0;

/// Minimum history before the context biases anything.
const MIN_HISTORY: usize = 3;

/// Bounded history of the user's recent utterances.
///
/// Only nudges confidence; never changes which signals fire or how the
/// verdict is mapped.
#[derive(Debug, Clone)]
pub struct TurnContext {
    utterances: VecDeque<String>,
    capacity: usize,
}

impl Default for TurnContext {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CONTEXT_CAPACITY)
    }
}

impl TurnContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            utterances: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a completed utterance, evicting the oldest when full.
    pub fn push(&mut self, utterance: impl Into<String>) {
        let utterance = utterance.into();
        if utterance.trim().is_empty() {
            return;
        }
        if self.utterances.len() == self.capacity {
            self.utterances.pop_front();
        }
        self.utterances.push_back(utterance);
    }

    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    pub fn utterances(&self) -> impl Iterator<Item = &str> {
        self.utterances.iter().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.utterances.clear();
    }

    fn mean_word_count(&self) -> Option<f32> {
        if self.utterances.is_empty() {
            return None;
        }
        let total: usize = self.utterances.iter().map(|u| word_count(u)).sum();
        Some(total as f32 / self.utterances.len() as f32)
    }

    /// Confidence adjustment for an utterance of `current_words` words,
    /// bounded by `max_bias` in either direction.
    pub(crate) fn bias(&self, current_words: usize, max_bias: f32) -> f32 {
        if self.utterances.len() < MIN_HISTORY {
            return 0.0;
        }
        let Some(mean) = self.mean_word_count() else {
            return 0.0;
        };
        let current = current_words as f32;

        if mean >= LONG_SPEAKER_MEAN_WORDS && current < mean / 2.0 {
            -max_bias
        } else if mean <= TERSE_SPEAKER_MEAN_WORDS && current <= TERSE_SPEAKER_MEAN_WORDS {
            max_bias
        } else {
            0.0
        }
    }
}
