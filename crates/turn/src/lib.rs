//! Turn-completion analysis for streaming transcripts.
//!
//! Scores a partial or final transcript together with silence duration and
//! optional prosody hints, and decides whether the user has finished their
//! turn and how long to wait before responding.

mod analyzer;
mod context;
mod signals;

pub use analyzer::{analyze, TurnAnalyzer};
pub use context::{TurnContext, DEFAULT_CONTEXT_CAPACITY};
pub use signals::word_count;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Prosody cues supplied by the acoustic front-end, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProsodyHints {
    /// Pitch rose at the end of the utterance.
    #[serde(default)]
    pub rising_intonation: bool,
    /// Audio ended in the middle of a word.
    #[serde(default)]
    pub mid_word_cutoff: bool,
}

/// One analysis input, produced per transcript update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnSignal {
    pub text: String,
    pub silence_duration_ms: u64,
    pub is_partial: bool,
    #[serde(default)]
    pub prosody: Option<ProsodyHints>,
}

impl TurnSignal {
    pub fn new(text: impl Into<String>, silence_duration_ms: u64, is_partial: bool) -> Self {
        Self {
            text: text.into(),
            silence_duration_ms,
            is_partial,
            prosody: None,
        }
    }

    pub fn with_prosody(mut self, prosody: ProsodyHints) -> Self {
        self.prosody = Some(prosody);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Moderate,
    Low,
    VeryLow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnAction {
    Respond,
    Wait,
}

/// Tags for every cue that fired during analysis, grouped by category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedSignals {
    pub strong_completion: BTreeSet<String>,
    pub weak_completion: BTreeSet<String>,
    pub continuation: BTreeSet<String>,
}

/// Outcome of one analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnVerdict {
    pub completion_confidence: f32,
    pub confidence_level: ConfidenceLevel,
    pub action: TurnAction,
    pub recommended_wait_ms: u64,
    pub use_filler_phrase: bool,
    pub detected_signals: DetectedSignals,
}

impl TurnVerdict {
    pub fn is_respond(&self) -> bool {
        self.action == TurnAction::Respond
    }
}

/// Weights and thresholds for the analyzer.
///
/// The defaults are the calibrated values; changing them changes how eagerly
/// the engine takes the floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    pub base_confidence: f32,
    pub strong_signal_weight: f32,
    pub weak_signal_weight: f32,
    pub continuation_penalty: f32,
    pub long_silence_ms: u64,
    pub long_silence_bonus: f32,
    pub medium_silence_ms: u64,
    pub medium_silence_bonus: f32,
    pub short_silence_ms: u64,
    pub short_silence_penalty: f32,
    pub partial_penalty: f32,
    pub high_threshold: f32,
    pub moderate_threshold: f32,
    pub low_threshold: f32,
    pub high_wait_ms: u64,
    pub moderate_wait_ms: u64,
    pub low_wait_ms: u64,
    pub very_low_wait_ms: u64,
    /// Utterances with more words than this get a filler phrase at moderate confidence.
    pub filler_min_words: usize,
    /// Command verbs only count as completion in utterances up to this length.
    pub command_max_words: usize,
    /// Continuation signals at or above this count force a wait.
    pub continuation_override_count: usize,
    pub continuation_override_wait_ms: u64,
    /// Upper bound on the bias the rolling context may apply.
    pub max_context_bias: f32,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            base_confidence: 0.5,
            strong_signal_weight: 0.25,
            weak_signal_weight: 0.15,
            continuation_penalty: 0.30,
            long_silence_ms: 2000,
            long_silence_bonus: 0.30,
            medium_silence_ms: 1000,
            medium_silence_bonus: 0.15,
            short_silence_ms: 300,
            short_silence_penalty: 0.10,
            partial_penalty: 0.20,
            high_threshold: 0.85,
            moderate_threshold: 0.65,
            low_threshold: 0.40,
            high_wait_ms: 200,
            moderate_wait_ms: 500,
            low_wait_ms: 1500,
            very_low_wait_ms: 3000,
            filler_min_words: 10,
            command_max_words: 5,
            continuation_override_count: 2,
            continuation_override_wait_ms: 2000,
            max_context_bias: 0.05,
        }
    }
}

impl TurnConfig {
    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        for (name, value) in [
            ("base_confidence", self.base_confidence),
            ("high_threshold", self.high_threshold),
            ("moderate_threshold", self.moderate_threshold),
            ("low_threshold", self.low_threshold),
        ] {
            if !unit.contains(&value) {
                return Err(TurnError::InvalidConfig(format!(
                    "{name} must be within 0.0..=1.0, got {value}"
                )));
            }
        }
        if !(self.high_threshold > self.moderate_threshold
            && self.moderate_threshold > self.low_threshold)
        {
            return Err(TurnError::InvalidConfig(
                "thresholds must be strictly descending (high > moderate > low)".to_string(),
            ));
        }
        if self.continuation_override_count == 0 {
            return Err(TurnError::InvalidConfig(
                "continuation_override_count must be at least 1".to_string(),
            ));
        }
        if !(0.0..=0.5).contains(&self.max_context_bias) {
            return Err(TurnError::InvalidConfig(format!(
                "max_context_bias must be within 0.0..=0.5, got {}",
                self.max_context_bias
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("invalid turn config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, TurnError>;
