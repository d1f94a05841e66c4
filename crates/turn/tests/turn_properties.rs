//! Behavioural properties of the turn analyzer.

use parley_turn::{
    analyze, ConfidenceLevel, ProsodyHints, TurnAction, TurnAnalyzer, TurnConfig, TurnContext,
    TurnSignal,
};

const HESITANT: &[&str] = &[
    "so I was thinking and, um",
    "can you, uh",
    "I want to, hmm",
    "What about, er",
    "Tell me about it because, you know",
];

// =============================================================================
// Continuation override
// =============================================================================

#[test]
fn test_two_continuation_signals_always_wait() {
    let rising = ProsodyHints {
        rising_intonation: true,
        mid_word_cutoff: false,
    };
    for text in HESITANT {
        for silence_ms in [0, 250, 800, 1500, 2500, 10_000] {
            for is_partial in [true, false] {
                let signal = TurnSignal::new(*text, silence_ms, is_partial).with_prosody(rising);
                let verdict = analyze(&signal, &TurnContext::new());
                assert!(
                    verdict.detected_signals.continuation.len() >= 2,
                    "expected two cues for {text:?}"
                );
                assert_eq!(verdict.action, TurnAction::Wait, "{text:?} @ {silence_ms}ms");
                assert!(verdict.recommended_wait_ms >= 2000);
            }
        }
    }
}

#[test]
fn test_override_holds_with_lenient_thresholds() {
    let analyzer = TurnAnalyzer::new(TurnConfig {
        high_threshold: 0.3,
        moderate_threshold: 0.2,
        low_threshold: 0.1,
        ..Default::default()
    });
    let signal = TurnSignal::new("I need to, um", 5000, false).with_prosody(ProsodyHints {
        rising_intonation: false,
        mid_word_cutoff: true,
    });
    let verdict = analyzer.analyze(&signal, &TurnContext::new());
    assert_eq!(verdict.confidence_level, ConfidenceLevel::High);
    assert_eq!(verdict.action, TurnAction::Wait);
}

// =============================================================================
// Reference inputs
// =============================================================================

#[test]
fn test_weather_question() {
    let verdict = analyze(
        &TurnSignal::new("What is the weather today?", 1200, false),
        &TurnContext::new(),
    );
    assert!(verdict.completion_confidence >= 0.85);
    assert_eq!(verdict.action, TurnAction::Respond);
}

#[test]
fn test_trailing_um() {
    let verdict = analyze(
        &TurnSignal::new("I want to know about, um", 500, false),
        &TurnContext::new(),
    );
    assert_eq!(verdict.action, TurnAction::Wait);
    assert!(verdict.recommended_wait_ms >= 2000);
}

#[test]
fn test_short_command() {
    let verdict = analyze(&TurnSignal::new("Stop", 400, false), &TurnContext::new());
    assert!(verdict
        .detected_signals
        .strong_completion
        .contains("command_verb:stop"));
    assert_eq!(verdict.action, TurnAction::Respond);
}

// =============================================================================
// Context bias
// =============================================================================

#[test]
fn test_context_bias_is_bounded() {
    let mut context = TurnContext::new();
    for _ in 0..10 {
        context.push("I have been thinking a lot about our trip and where we should stay");
    }
    let signal = TurnSignal::new("I need a taxi.", 1000, false);
    let biased = analyze(&signal, &context);
    let plain = analyze(&signal, &TurnContext::new());
    let delta = plain.completion_confidence - biased.completion_confidence;
    assert!(delta > 0.0 && delta <= 0.05 + 1e-6);
}

#[test]
fn test_verdict_serializes_snake_case() {
    let verdict = analyze(&TurnSignal::new("Okay.", 2000, false), &TurnContext::new());
    let json = serde_json::to_value(&verdict).unwrap();
    assert_eq!(json["action"], "respond");
    assert_eq!(json["confidence_level"], "high");
}
