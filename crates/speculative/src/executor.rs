use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::divergence::divergence;
use crate::generator::{
    spawn_generation, GenerationHandle, GenerationRequest, GenerationStatus, ResponseGenerator,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeculationConfig {
    pub enabled: bool,
    /// Partial transcripts shorter than this (chars, trimmed) never start speculation.
    pub min_transcript_chars: usize,
    pub max_tokens: usize,
    /// Divergence above this cancels the speculation.
    pub divergence_threshold: f32,
}

impl Default for SpeculationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_transcript_chars: 15,
            max_tokens: 50,
            divergence_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeculationPhase {
    #[default]
    Idle,
    Speculating,
    Confirmed,
    Cancelled,
}

/// Snapshot of the active speculation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeculationState {
    pub phase: SpeculationPhase,
    pub baseline_transcript: String,
    pub emitted_tokens: Vec<String>,
    pub started_at: Option<Instant>,
}

/// Running counters for observability.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpeculationStats {
    pub started: u64,
    pub confirmed: u64,
    pub diverged: u64,
    pub cancelled: u64,
    pub failed: u64,
    pub latency_saved: Duration,
}

/// A speculation that survived confirmation; owns the live generation.
#[derive(Debug)]
pub struct ConfirmedSpeculation {
    pub handle: GenerationHandle,
    pub latency_saved: Duration,
    pub divergence: f32,
}

#[derive(Debug)]
pub enum SpeculationOutcome {
    Confirmed(ConfirmedSpeculation),
    /// The final transcript drifted too far; regenerate from scratch.
    Diverged { divergence: f32 },
    /// Nothing usable: never started, already cancelled, or the generator failed.
    Unavailable,
}

/// Owns at most one speculative generation per session.
pub struct SpeculativeExecutor {
    generator: Arc<dyn ResponseGenerator>,
    config: SpeculationConfig,
    phase: SpeculationPhase,
    baseline: String,
    started_at: Option<Instant>,
    handle: Option<GenerationHandle>,
    continuation_context: Option<String>,
    /// Tokens captured when the handle was released.
    settled_tokens: Vec<String>,
    stats: SpeculationStats,
}

impl std::fmt::Debug for SpeculativeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeculativeExecutor")
            .field("generator", &self.generator.name())
            .field("phase", &self.phase)
            .field("baseline", &self.baseline)
            .finish()
    }
}

impl SpeculativeExecutor {
    pub fn new(generator: Arc<dyn ResponseGenerator>, config: SpeculationConfig) -> Self {
        Self {
            generator,
            config,
            phase: SpeculationPhase::Idle,
            baseline: String::new(),
            started_at: None,
            handle: None,
            continuation_context: None,
            settled_tokens: Vec::new(),
            stats: SpeculationStats::default(),
        }
    }

    pub fn config(&self) -> &SpeculationConfig {
        &self.config
    }

    pub fn phase(&self) -> SpeculationPhase {
        self.phase
    }

    pub fn stats(&self) -> &SpeculationStats {
        &self.stats
    }

    pub fn is_speculating(&self) -> bool {
        self.phase == SpeculationPhase::Speculating
    }

    pub fn state(&self) -> SpeculationState {
        SpeculationState {
            phase: self.phase,
            baseline_transcript: self.baseline.clone(),
            emitted_tokens: self.emitted_tokens(),
            started_at: self.started_at,
        }
    }

    /// Context attached to every speculative request from now on, typically
    /// the summary of an interrupted response.
    pub fn set_continuation_context(&mut self, context: Option<String>) {
        self.continuation_context = context;
    }

    pub fn emitted_tokens(&self) -> Vec<String> {
        match &self.handle {
            Some(handle) => handle.emitted_tokens(),
            None => self.settled_tokens.clone(),
        }
    }

    /// Start speculating from a partial transcript.
    ///
    /// Returns false (and changes nothing) when speculation is disabled or the
    /// transcript is too short. Any running speculation is cancelled first.
    /// Must be called inside a tokio runtime.
    pub fn start_speculation(&mut self, partial_transcript: &str) -> bool {
        if !self.config.enabled
            || partial_transcript.trim().chars().count() < self.config.min_transcript_chars
        {
            return false;
        }

        if self.handle.is_some() {
            tracing::debug!(old = %self.baseline, "Replacing running speculation");
            self.cancel();
        }

        let request = GenerationRequest::new(partial_transcript)
            .with_continuation(self.continuation_context.clone());
        self.handle = Some(spawn_generation(
            Arc::clone(&self.generator),
            request,
            Some(self.config.max_tokens),
        ));
        self.phase = SpeculationPhase::Speculating;
        self.baseline = partial_transcript.to_string();
        self.started_at = Some(Instant::now());
        self.settled_tokens.clear();
        self.stats.started += 1;

        tracing::debug!(baseline = %self.baseline, "Speculation started");
        true
    }

    /// Compare a newer partial transcript against the baseline.
    ///
    /// Returns the divergence while speculating (cancelling above the
    /// threshold), or `None` when there is nothing to compare against.
    pub fn update_transcript(&mut self, new_transcript: &str) -> Option<f32> {
        if !self.is_speculating() {
            return None;
        }
        if self.check_failed() {
            return None;
        }

        let score = divergence(&self.baseline, new_transcript);
        if score > self.config.divergence_threshold {
            tracing::debug!(
                divergence = score,
                baseline = %self.baseline,
                transcript = %new_transcript,
                "Transcript diverged, cancelling speculation"
            );
            self.stats.diverged += 1;
            self.cancel();
        }
        Some(score)
    }

    /// Accept or reject the speculation against the final transcript.
    pub fn confirm(&mut self, final_transcript: &str) -> SpeculationOutcome {
        if !self.is_speculating() || self.check_failed() {
            return SpeculationOutcome::Unavailable;
        }

        let score = divergence(&self.baseline, final_transcript);
        if score > self.config.divergence_threshold {
            tracing::debug!(divergence = score, "Final transcript diverged from speculation");
            self.stats.diverged += 1;
            self.cancel();
            return SpeculationOutcome::Diverged { divergence: score };
        }

        let Some(handle) = self.handle.take() else {
            return SpeculationOutcome::Unavailable;
        };
        let latency_saved = self
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or_default();

        self.settled_tokens = handle.emitted_tokens();
        self.phase = SpeculationPhase::Confirmed;
        self.stats.confirmed += 1;
        self.stats.latency_saved += latency_saved;

        tracing::debug!(
            divergence = score,
            latency_saved_ms = latency_saved.as_millis() as u64,
            tokens = self.settled_tokens.len(),
            "Speculation confirmed"
        );

        SpeculationOutcome::Confirmed(ConfirmedSpeculation {
            handle,
            latency_saved,
            divergence: score,
        })
    }

    /// Cancel the running speculation. Safe to call repeatedly.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.cancel();
            self.settled_tokens = handle.emitted_tokens();
            self.stats.cancelled += 1;
        }
        if self.phase != SpeculationPhase::Confirmed {
            self.phase = SpeculationPhase::Cancelled;
        }
    }

    /// Return to idle at a turn boundary, cancelling anything still running.
    pub fn reset(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.cancel();
            self.stats.cancelled += 1;
        }
        self.phase = SpeculationPhase::Idle;
        self.baseline.clear();
        self.started_at = None;
        self.settled_tokens.clear();
    }

    /// Degrade a failed generation to "no speculation available".
    fn check_failed(&mut self) -> bool {
        let failed = self
            .handle
            .as_ref()
            .is_some_and(|h| h.status() == GenerationStatus::Failed);
        if failed {
            tracing::debug!("Speculative generation failed, falling back to normal path");
            self.handle = None;
            self.phase = SpeculationPhase::Cancelled;
            self.stats.failed += 1;
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingGenerator, SlowGenerator, StaticGenerator};

    fn executor() -> SpeculativeExecutor {
        SpeculativeExecutor::new(
            Arc::new(SlowGenerator::new(Duration::from_millis(10))),
            SpeculationConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_short_transcript_is_noop() {
        let mut exec = executor();
        assert!(!exec.start_speculation("Hi there"));
        assert_eq!(exec.phase(), SpeculationPhase::Idle);
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let mut exec = SpeculativeExecutor::new(
            Arc::new(StaticGenerator::new(&["x"])),
            SpeculationConfig {
                enabled: false,
                ..Default::default()
            },
        );
        assert!(!exec.start_speculation("What is the capital of"));
    }

    #[tokio::test]
    async fn test_prefix_update_keeps_speculating() {
        let mut exec = executor();
        assert!(exec.start_speculation("What is the capital"));
        let score = exec.update_transcript("What is the capital of France");
        assert_eq!(score, Some(0.0));
        assert!(exec.is_speculating());
    }

    #[tokio::test]
    async fn test_divergent_update_cancels() {
        let mut exec = executor();
        assert!(exec.start_speculation("Tell me about dogs"));
        let score = exec.update_transcript("Actually, play music").unwrap();
        assert!(score > 0.3);
        assert_eq!(exec.phase(), SpeculationPhase::Cancelled);
        assert_eq!(exec.stats().diverged, 1);
    }

    #[tokio::test]
    async fn test_new_speculation_replaces_old() {
        let mut exec = executor();
        assert!(exec.start_speculation("Tell me about dogs"));
        assert!(exec.start_speculation("Tell me about cats please"));
        assert!(exec.is_speculating());
        assert_eq!(exec.state().baseline_transcript, "Tell me about cats please");
        assert_eq!(exec.stats().started, 2);
        assert_eq!(exec.stats().cancelled, 1);
    }

    #[tokio::test]
    async fn test_cancel_twice_is_idempotent() {
        let mut exec = executor();
        exec.start_speculation("Tell me about dogs");
        exec.cancel();
        exec.cancel();
        assert_eq!(exec.phase(), SpeculationPhase::Cancelled);
        assert_eq!(exec.stats().cancelled, 1);
    }

    #[tokio::test]
    async fn test_confirm_returns_tokens() {
        let mut exec = SpeculativeExecutor::new(
            Arc::new(StaticGenerator::new(&["Paris", " is", " the", " capital."])),
            SpeculationConfig::default(),
        );
        assert!(exec.start_speculation("What is the capital of"));
        match exec.confirm("What is the capital of France?") {
            SpeculationOutcome::Confirmed(confirmed) => {
                let (tokens, status) = confirmed.handle.collect().await;
                assert_eq!(tokens.concat(), "Paris is the capital.");
                assert_eq!(status, GenerationStatus::Finished);
            }
            other => panic!("expected confirmation, got {other:?}"),
        }
        assert_eq!(exec.phase(), SpeculationPhase::Confirmed);
    }

    #[tokio::test]
    async fn test_confirm_diverged() {
        let mut exec = executor();
        exec.start_speculation("Tell me about dogs");
        let outcome = exec.confirm("Never mind, stop it");
        assert!(matches!(outcome, SpeculationOutcome::Diverged { .. }));
        assert_eq!(exec.phase(), SpeculationPhase::Cancelled);
    }

    #[tokio::test]
    async fn test_confirm_without_speculation() {
        let mut exec = executor();
        assert!(matches!(
            exec.confirm("anything at all here"),
            SpeculationOutcome::Unavailable
        ));
    }

    #[tokio::test]
    async fn test_generator_failure_degrades() {
        let mut exec = SpeculativeExecutor::new(
            Arc::new(FailingGenerator),
            SpeculationConfig::default(),
        );
        assert!(exec.start_speculation("What is the capital of"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            exec.confirm("What is the capital of France?"),
            SpeculationOutcome::Unavailable
        ));
        assert_eq!(exec.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_reset_returns_to_idle() {
        let mut exec = executor();
        exec.start_speculation("Tell me about dogs");
        exec.reset();
        assert_eq!(exec.phase(), SpeculationPhase::Idle);
        assert!(exec.state().baseline_transcript.is_empty());
    }
}
