//! End-to-end behaviour of the speculative executor against in-process generators.

use std::sync::Arc;
use std::time::Duration;

use parley_speculative::testing::{SlowGenerator, StaticGenerator};
use parley_speculative::{
    divergence, GenerationStatus, SpeculationConfig, SpeculationOutcome, SpeculationPhase,
    SpeculativeExecutor,
};

// ============================================================================
// Divergence
// ============================================================================

mod divergence_tests {
    use super::*;

    #[test]
    fn test_extension_does_not_diverge() {
        assert_eq!(
            divergence("What is the capital", "What is the capital of France"),
            0.0
        );
    }

    #[test]
    fn test_topic_change_diverges() {
        assert!(divergence("Tell me about dogs", "Actually, play music") > 0.3);
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_replaced_speculation_releases_generator() {
        let generator = Arc::new(SlowGenerator::new(Duration::from_millis(5)));
        let mut exec = SpeculativeExecutor::new(generator.clone(), SpeculationConfig::default());

        assert!(exec.start_speculation("Tell me about dogs"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(exec.start_speculation("Tell me about the weather"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Only the second generation is still streaming.
        assert_eq!(generator.open_streams(), 1);

        exec.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(generator.open_streams(), 0);
        assert_eq!(exec.phase(), SpeculationPhase::Cancelled);
    }

    #[tokio::test]
    async fn test_tokens_captured_on_cancel() {
        let generator = Arc::new(SlowGenerator::new(Duration::from_millis(5)));
        let mut exec = SpeculativeExecutor::new(generator, SpeculationConfig::default());

        exec.start_speculation("Tell me about dogs");
        tokio::time::sleep(Duration::from_millis(40)).await;
        exec.cancel();

        let captured = exec.emitted_tokens();
        assert!(!captured.is_empty());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(exec.emitted_tokens(), captured);
    }

    #[tokio::test]
    async fn test_token_cap_applies() {
        let generator = Arc::new(SlowGenerator::new(Duration::from_millis(1)));
        let mut exec = SpeculativeExecutor::new(
            generator,
            SpeculationConfig {
                max_tokens: 5,
                ..Default::default()
            },
        );

        exec.start_speculation("What is the capital of");
        match exec.confirm("What is the capital of Spain") {
            SpeculationOutcome::Confirmed(confirmed) => {
                let (tokens, status) = confirmed.handle.collect().await;
                assert_eq!(tokens.len(), 5);
                assert_eq!(status, GenerationStatus::Capped);
            }
            other => panic!("expected confirmation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_confirm_records_latency_saved() {
        let generator = Arc::new(StaticGenerator::new(&["Sure", "."]));
        let mut exec = SpeculativeExecutor::new(generator, SpeculationConfig::default());

        exec.start_speculation("Could you set a timer");
        tokio::time::sleep(Duration::from_millis(15)).await;
        let outcome = exec.confirm("Could you set a timer for ten minutes");

        let SpeculationOutcome::Confirmed(confirmed) = outcome else {
            panic!("expected confirmation");
        };
        assert!(confirmed.latency_saved >= Duration::from_millis(15));
        assert_eq!(exec.stats().confirmed, 1);
        assert!(exec.stats().latency_saved >= Duration::from_millis(15));

        // Cancel after confirmation leaves the confirmed state alone.
        exec.cancel();
        assert_eq!(exec.phase(), SpeculationPhase::Confirmed);
    }
}
