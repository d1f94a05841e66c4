//! Cut-point planning for responses interrupted mid-playback.
//!
//! Given the full response text and an estimate of how much of it the user
//! has already heard, picks the most natural boundary at or before that
//! point and describes what was cut so the next response can pick up from it.

use serde::{Deserialize, Serialize};

/// Average speaking rate used when only elapsed playback time is known.
pub const DEFAULT_CHARS_PER_SECOND: f32 = 15.0;

const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?'];
const CLAUSE_TERMINATORS: &[char] = &[',', ';', ':'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationType {
    Sentence,
    Phrase,
    Word,
    MidWord,
    Immediate,
}

impl TruncationType {
    /// Sentence and phrase cuts sound intentional; the rest sound clipped.
    pub fn is_graceful(self) -> bool {
        matches!(self, Self::Sentence | Self::Phrase)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruncationResult {
    pub truncation_type: TruncationType,
    pub spoken_text: String,
    pub unspoken_text: String,
    pub was_graceful: bool,
    pub continuation_context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TruncationConfig {
    /// How far back (chars) to look for a sentence terminator.
    pub sentence_window: usize,
    /// How far back (chars) to look for a clause terminator.
    pub phrase_window: usize,
    /// How far back (chars) to look for a word boundary.
    pub word_window: usize,
    pub include_continuation_context: bool,
    /// Characters quoted from each side of the cut in the continuation context.
    pub context_chars: usize,
    pub chars_per_second: f32,
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            sentence_window: 50,
            phrase_window: 30,
            word_window: 15,
            include_continuation_context: true,
            context_chars: 80,
            chars_per_second: DEFAULT_CHARS_PER_SECOND,
        }
    }
}

/// Estimate audible characters from elapsed playback time.
pub fn estimate_spoken_chars(elapsed_ms: u64, chars_per_second: f32) -> usize {
    if chars_per_second <= 0.0 {
        return 0;
    }
    ((elapsed_ms as f64 / 1000.0) * chars_per_second as f64).floor() as usize
}

/// Find the cut point with the default search windows.
pub fn find_truncation_point(full_response: &str, approx_spoken_chars: usize) -> TruncationResult {
    TruncationPlanner::default().find_truncation_point(full_response, approx_spoken_chars)
}

#[derive(Debug, Clone, Default)]
pub struct TruncationPlanner {
    config: TruncationConfig,
}

impl TruncationPlanner {
    pub fn new(config: TruncationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TruncationConfig {
        &self.config
    }

    /// Find the cut point from elapsed playback time.
    pub fn truncate_after(&self, full_response: &str, elapsed_ms: u64) -> TruncationResult {
        let spoken = estimate_spoken_chars(elapsed_ms, self.config.chars_per_second);
        self.find_truncation_point(full_response, spoken)
    }

    /// Find the best cut point at or before `approx_spoken_chars`.
    ///
    /// Positions are counted in chars, not bytes. Never fails: when no
    /// boundary is close enough the cut lands mid-word at the estimate.
    pub fn find_truncation_point(
        &self,
        full_response: &str,
        approx_spoken_chars: usize,
    ) -> TruncationResult {
        let chars: Vec<char> = full_response.chars().collect();
        let len = chars.len();
        let pos = approx_spoken_chars.min(len);

        let (truncation_type, cut) = if pos == 0 {
            (TruncationType::Immediate, 0)
        } else if pos >= len {
            (TruncationType::Sentence, len)
        } else if let Some(cut) = self.find_sentence_end(&chars, pos) {
            (TruncationType::Sentence, cut)
        } else if let Some(cut) = search_back(&chars, pos, self.config.phrase_window, |c| {
            CLAUSE_TERMINATORS.contains(&c)
        }) {
            (TruncationType::Phrase, cut + 1)
        } else if let Some(cut) =
            search_back(&chars, pos, self.config.word_window, char::is_whitespace)
        {
            (TruncationType::Word, cut)
        } else {
            (TruncationType::MidWord, pos)
        };

        let spoken_text: String = chars[..cut].iter().collect::<String>().trim_end().to_string();
        let unspoken_text: String = chars[cut..].iter().collect::<String>().trim_start().to_string();

        let continuation_context = self
            .config
            .include_continuation_context
            .then(|| self.continuation_context(&spoken_text, &unspoken_text));

        tracing::debug!(
            ?truncation_type,
            approx_spoken_chars,
            cut,
            total_chars = len,
            "Planned truncation"
        );

        TruncationResult {
            truncation_type,
            spoken_text,
            unspoken_text,
            was_graceful: truncation_type.is_graceful(),
            continuation_context,
        }
    }

    fn find_sentence_end(&self, chars: &[char], pos: usize) -> Option<usize> {
        let start = pos.saturating_sub(self.config.sentence_window);
        (start..pos)
            .rev()
            .find(|&i| {
                SENTENCE_TERMINATORS.contains(&chars[i])
                    && chars.get(i + 1).map_or(true, |next| next.is_whitespace())
            })
            .map(|i| i + 1)
    }

    fn continuation_context(&self, spoken: &str, unspoken: &str) -> String {
        let n = self.config.context_chars;
        if unspoken.is_empty() {
            return format!(
                "The previous response was interrupted after it finished: \"{}\".",
                tail(spoken, n)
            );
        }
        if spoken.is_empty() {
            return format!(
                "The previous response was interrupted before any of it was heard. It would have said: \"{}\".",
                head(unspoken, n)
            );
        }
        format!(
            "The previous response was interrupted. The user heard: \"{}\". Not yet said: \"{}\".",
            tail(spoken, n),
            head(unspoken, n)
        )
    }
}

fn search_back(chars: &[char], pos: usize, window: usize, pred: impl Fn(char) -> bool) -> Option<usize> {
    let start = pos.saturating_sub(window);
    (start..pos).rev().find(|&i| pred(chars[i]))
}

fn tail(text: &str, n: usize) -> String {
    let count = text.chars().count();
    if count <= n {
        return text.to_string();
    }
    let skipped: String = text.chars().skip(count - n).collect();
    format!("...{}", skipped.trim_start())
}

fn head(text: &str, n: usize) -> String {
    if text.chars().count() <= n {
        return text.to_string();
    }
    let taken: String = text.chars().take(n).collect();
    format!("{}...", taken.trim_end())
}

/// Short lead-in for the response that follows an interruption.
pub fn generate_acknowledgment_prefix(
    truncation: &TruncationResult,
    user_utterance: &str,
) -> &'static str {
    let words: Vec<String> = user_utterance
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();

    let has_word = |needle: &str| words.iter().any(|w| w == needle);

    if has_word("stop") || has_word("wait") {
        "Sorry about that. "
    } else if user_utterance.trim_end().ends_with('?') {
        "Sure. "
    } else if words
        .first()
        .is_some_and(|w| matches!(w.as_str(), "actually" | "also" | "and" | "but"))
    {
        "Good point. "
    } else if truncation.was_graceful {
        ""
    } else {
        "Got it. "
    }
}
