use crate::context::TurnContext;
use crate::signals::{normalized_words, scan};
use crate::{ConfidenceLevel, DetectedSignals, TurnAction, TurnConfig, TurnSignal, TurnVerdict};

/// Analyze one transcript update with the default calibration.
pub fn analyze(signal: &TurnSignal, context: &TurnContext) -> TurnVerdict {
    TurnAnalyzer::default().analyze(signal, context)
}

/// Stateless turn-completion scorer.
#[derive(Debug, Clone, Default)]
pub struct TurnAnalyzer {
    config: TurnConfig,
}

impl TurnAnalyzer {
    pub fn new(config: TurnConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    pub fn analyze(&self, signal: &TurnSignal, context: &TurnContext) -> TurnVerdict {
        let config = &self.config;

        if signal.text.trim().is_empty() {
            let detected_signals = scan("", signal.prosody, config);
            return TurnVerdict {
                completion_confidence: config.base_confidence,
                confidence_level: ConfidenceLevel::Low,
                action: TurnAction::Wait,
                recommended_wait_ms: config
                    .low_wait_ms
                    .max(override_wait(&detected_signals, config)),
                use_filler_phrase: false,
                detected_signals,
            };
        }

        let detected_signals = scan(&signal.text, signal.prosody, config);
        let words = normalized_words(&signal.text).len();

        let mut confidence = config.base_confidence;
        confidence += detected_signals.strong_completion.len() as f32 * config.strong_signal_weight;
        confidence += detected_signals.weak_completion.len() as f32 * config.weak_signal_weight;
        confidence -= detected_signals.continuation.len() as f32 * config.continuation_penalty;

        if signal.silence_duration_ms >= config.long_silence_ms {
            confidence += config.long_silence_bonus;
        } else if signal.silence_duration_ms >= config.medium_silence_ms {
            confidence += config.medium_silence_bonus;
        } else if signal.silence_duration_ms < config.short_silence_ms {
            confidence -= config.short_silence_penalty;
        }

        if signal.is_partial {
            confidence -= config.partial_penalty;
        }

        confidence += context.bias(words, config.max_context_bias);
        let confidence = confidence.clamp(0.0, 1.0);

        let (level, mut action, mut wait_ms) = if confidence >= config.high_threshold {
            (ConfidenceLevel::High, TurnAction::Respond, config.high_wait_ms)
        } else if confidence >= config.moderate_threshold {
            (ConfidenceLevel::Moderate, TurnAction::Respond, config.moderate_wait_ms)
        } else if confidence >= config.low_threshold {
            (ConfidenceLevel::Low, TurnAction::Wait, config.low_wait_ms)
        } else {
            (ConfidenceLevel::VeryLow, TurnAction::Wait, config.very_low_wait_ms)
        };

        let mut use_filler_phrase =
            level == ConfidenceLevel::Moderate && words > config.filler_min_words;

        // Hesitant speech never ends a turn, whatever the score says.
        if detected_signals.continuation.len() >= config.continuation_override_count {
            action = TurnAction::Wait;
            wait_ms = wait_ms.max(config.continuation_override_wait_ms);
            use_filler_phrase = false;
        }

        tracing::trace!(
            confidence,
            ?level,
            ?action,
            wait_ms,
            strong = detected_signals.strong_completion.len(),
            weak = detected_signals.weak_completion.len(),
            continuation = detected_signals.continuation.len(),
            "Turn analyzed"
        );

        TurnVerdict {
            completion_confidence: confidence,
            confidence_level: level,
            action,
            recommended_wait_ms: wait_ms,
            use_filler_phrase,
            detected_signals,
        }
    }
}

fn override_wait(signals: &DetectedSignals, config: &TurnConfig) -> u64 {
    if signals.continuation.len() >= config.continuation_override_count {
        config.continuation_override_wait_ms
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(text: &str, silence_ms: u64, is_partial: bool) -> TurnVerdict {
        analyze(&TurnSignal::new(text, silence_ms, is_partial), &TurnContext::new())
    }

    #[test]
    fn test_question_with_silence_responds() {
        let v = verdict("What is the weather today?", 1200, false);
        assert!(v.completion_confidence >= 0.85);
        assert_eq!(v.confidence_level, ConfidenceLevel::High);
        assert_eq!(v.action, TurnAction::Respond);
        assert_eq!(v.recommended_wait_ms, 200);
    }

    #[test]
    fn test_hesitation_waits() {
        let v = verdict("I want to know about, um", 500, false);
        assert_eq!(v.action, TurnAction::Wait);
        assert!(v.recommended_wait_ms >= 2000);
        assert!(v.detected_signals.continuation.contains("hesitation:um"));
    }

    #[test]
    fn test_empty_transcript_waits_near_base() {
        let v = verdict("   ", 5000, false);
        assert_eq!(v.action, TurnAction::Wait);
        assert!((v.completion_confidence - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_partial_penalty_applies() {
        let final_v = verdict("I need a taxi.", 1000, false);
        let partial_v = verdict("I need a taxi.", 1000, true);
        let diff = final_v.completion_confidence - partial_v.completion_confidence;
        assert!((diff - 0.20).abs() < 1e-4);
    }

    #[test]
    fn test_short_silence_penalty() {
        let v = verdict("I need a taxi.", 100, false);
        // 0.5 + 0.15 + 0.15 - 0.10
        assert!((v.completion_confidence - 0.70).abs() < 1e-4);
        assert_eq!(v.confidence_level, ConfidenceLevel::Moderate);
    }

    #[test]
    fn test_moderate_long_utterance_uses_filler() {
        let v = verdict(
            "I think we should book the hotel near the station for three nights.",
            500,
            false,
        );
        assert_eq!(v.confidence_level, ConfidenceLevel::Moderate);
        assert!(v.use_filler_phrase);
    }

    #[test]
    fn test_override_beats_strong_score() {
        // 0.5 + 0.50 - 0.60 + 0.30 = 0.70, a respond-level score.
        let signal = TurnSignal::new("Yes?", 3000, false).with_prosody(crate::ProsodyHints {
            rising_intonation: true,
            mid_word_cutoff: true,
        });
        let v = analyze(&signal, &TurnContext::new());
        assert!(v.completion_confidence >= 0.65);
        assert_eq!(v.detected_signals.continuation.len(), 2);
        assert_eq!(v.action, TurnAction::Wait);
        assert!(v.recommended_wait_ms >= 2000);
        assert!(!v.use_filler_phrase);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let v = verdict("Yes?", 5000, false);
        assert!(v.completion_confidence <= 1.0);
        let v = verdict("and so, um", 0, true);
        assert!(v.completion_confidence >= 0.0);
    }
}
