//! The session actor: single owner of turn, speculation and duplex state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parley_duplex::{DuplexCoordinator, SpeechDecision};
use parley_events::{
    now_ms, ControlEvent, ErrorEvent, PlaybackProgressEvent, ResponseCompleteEvent,
    ResponseDeltaEvent, ResponseTruncatedEvent, SessionReadyEvent, SessionStartEvent,
    SpeechDetectedEvent, StateChangeEvent, TranscriptDeltaEvent, TurnVerdictEvent,
};
use parley_speculative::{
    GenerationRequest, GenerationStatus, ResponseGenerator, SpeculationOutcome,
    SpeculativeExecutor,
};
use parley_truncation::{generate_acknowledgment_prefix, TruncationPlanner, TruncationResult};
use parley_turn::{word_count, TurnAnalyzer, TurnContext, TurnSignal, TurnVerdict};
use parley_wire::frame::{pcm_duration_ms, OUTPUT_SAMPLE_RATE};
use parley_wire::{negotiate, FeatureSet};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::response::{ResponseSource, ResponseTask, ResponseUpdate};
use crate::session::{sleep_until, TranscriptEvent};
use crate::synth::SpeechSynthesizer;

/// Input to the actor, from the inbound task, the handle or a response task.
#[derive(Debug)]
pub(crate) enum Command {
    Handshake(SessionStartEvent),
    Transcript(TranscriptEvent),
    SpeechDetected(SpeechDetectedEvent),
    PlaybackProgress(PlaybackProgressEvent),
    PlaybackComplete,
    /// A control message that failed to parse.
    ProtocolError { kind: String, message: String },
    Response { id: String, update: ResponseUpdate },
}

/// Output of the actor, consumed by the outbound task.
#[derive(Debug)]
pub(crate) enum Outgoing {
    Features(FeatureSet),
    Control {
        kind: &'static str,
        data: serde_json::Value,
    },
    Audio {
        response_id: String,
        pcm: Vec<u8>,
        text: Option<String>,
    },
}

/// The response currently streaming or playing.
struct ActiveResponse {
    id: String,
    /// Everything sent as `response.delta` so far.
    text: String,
    cancel: CancellationToken,
    speculative: bool,
    latency_saved: Duration,
    first_audio: Option<Instant>,
    audio_ms: u64,
    /// Generation and synthesis are done; only playback may remain.
    finished: bool,
}

pub(crate) struct SessionActor {
    id: String,
    config: EngineConfig,
    analyzer: TurnAnalyzer,
    context: TurnContext,
    speculation: SpeculativeExecutor,
    duplex: DuplexCoordinator,
    truncation: TruncationPlanner,
    generator: Arc<dyn ResponseGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    outgoing: mpsc::Sender<Outgoing>,
    /// Handed to response tasks so their updates come back through the loop.
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,

    /// Final transcripts of the current turn, joined.
    turn_text: String,
    last_word_count: usize,
    /// Transcript timestamp at which the word count last changed.
    words_changed_at: Option<u64>,
    /// Respond once this passes unless the user keeps talking.
    respond_at: Option<Instant>,
    /// Wait recommended by the verdict that armed `respond_at`.
    respond_wait: Duration,

    response: Option<ActiveResponse>,
    /// Estimated end of client playback for the active response.
    playback_end: Option<Instant>,
    last_truncation: Option<TruncationResult>,
    continuation_context: Option<String>,
}

impl SessionActor {
    pub(crate) fn new(
        id: String,
        config: EngineConfig,
        generator: Arc<dyn ResponseGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        outgoing: mpsc::Sender<Outgoing>,
        commands: mpsc::Sender<Command>,
    ) -> Self {
        Self {
            id,
            analyzer: TurnAnalyzer::new(config.turn.clone()),
            context: TurnContext::new(),
            speculation: SpeculativeExecutor::new(
                Arc::clone(&generator),
                config.speculation.clone(),
            ),
            duplex: DuplexCoordinator::new(config.duplex.clone()),
            truncation: TruncationPlanner::new(config.truncation.clone()),
            config,
            generator,
            synthesizer,
            outgoing,
            commands,
            cancel: CancellationToken::new(),
            turn_text: String::new(),
            last_word_count: 0,
            words_changed_at: None,
            respond_at: None,
            respond_wait: Duration::ZERO,
            response: None,
            playback_end: None,
            last_truncation: None,
            continuation_context: None,
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(session_id = %self.id))]
    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>, cancel: CancellationToken) {
        self.cancel = cancel.clone();
        self.update_duplex(DuplexCoordinator::start_listening).await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = sleep_until(self.respond_at) => {
                    self.respond_at = None;
                    tracing::debug!("Wait elapsed without more speech, responding");
                    self.respond().await;
                }
                _ = sleep_until(self.playback_end) => self.playback_elapsed().await,
            }
        }

        self.teardown();
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Handshake(event) => self.handle_handshake(event).await,
            Command::Transcript(event) => self.handle_transcript(event).await,
            Command::SpeechDetected(event) => self.handle_speech(event).await,
            Command::PlaybackProgress(event) => self.duplex.record_spoken_chars(event.spoken_chars),
            Command::PlaybackComplete => self.handle_playback_complete().await,
            Command::ProtocolError { kind, message } => {
                tracing::warn!(kind = %kind, error = %message, "Malformed control message");
                self.emit(&ErrorEvent::new("invalid_message", format!("{kind}: {message}")))
                    .await;
            }
            Command::Response { id, update } => self.handle_response(id, update).await,
        }
    }

    async fn handle_handshake(&mut self, event: SessionStartEvent) {
        let client = FeatureSet::from_names(event.features.as_slice());
        let agreed = negotiate(&client, &self.config.server_features);
        tracing::info!(features = ?agreed.names(), "Handshake complete");

        self.send(Outgoing::Features(agreed)).await;
        self.emit(&SessionReadyEvent {
            session_id: self.id.clone(),
            features: agreed.names(),
        })
        .await;
    }

    // ------------------------------------------------------------------------
    // Turn taking
    // ------------------------------------------------------------------------

    async fn handle_transcript(&mut self, event: TranscriptEvent) {
        self.respond_at = None;

        let text = join_turn(&self.turn_text, &event.text);
        let words = word_count(&text);
        if words != self.last_word_count {
            self.last_word_count = words;
            self.words_changed_at = Some(event.timestamp_ms);
        }
        let changed_at = *self.words_changed_at.get_or_insert(event.timestamp_ms);
        let silence_ms = event.timestamp_ms.saturating_sub(changed_at);

        self.emit(&TranscriptDeltaEvent {
            text: event.text.clone(),
            is_final: event.is_final,
        })
        .await;

        let signal = TurnSignal::new(text.as_str(), silence_ms, !event.is_final);
        let verdict = self.analyzer.analyze(&signal, &self.context);
        tracing::debug!(
            confidence = verdict.completion_confidence,
            action = ?verdict.action,
            silence_ms,
            is_final = event.is_final,
            "Turn verdict"
        );
        self.emit(&TurnVerdictEvent {
            verdict: verdict.clone(),
            is_partial: !event.is_final,
        })
        .await;

        if !event.is_final {
            self.drive_speculation(&text, &verdict);
            return;
        }

        self.turn_text = text;
        if verdict.is_respond() {
            self.respond().await;
        } else {
            self.respond_wait = Duration::from_millis(verdict.recommended_wait_ms);
            self.respond_at = Some(Instant::now() + self.respond_wait);
        }
    }

    fn drive_speculation(&mut self, text: &str, verdict: &TurnVerdict) {
        if verdict.detected_signals.continuation.len() >= self.config.turn.continuation_override_count {
            if self.speculation.is_speculating() {
                tracing::debug!("User is mid-thought, dropping speculation");
                self.speculation.cancel();
            }
            return;
        }

        if self.speculation.is_speculating() {
            self.speculation.update_transcript(text);
            if self.speculation.is_speculating() {
                return;
            }
        }
        // Nothing running (or it just diverged): speculate on the newest text.
        self.speculation.start_speculation(text);
    }

    /// End the user's turn and start the reply.
    async fn respond(&mut self) {
        let prompt = std::mem::take(&mut self.turn_text);
        self.last_word_count = 0;
        self.words_changed_at = None;
        self.respond_at = None;
        if prompt.trim().is_empty() {
            self.speculation.reset();
            return;
        }

        if self.response.is_some() {
            tracing::debug!("New turn supersedes the active response");
            let fade_out_ms = self.config.duplex.fade_out_ms;
            let preserve = self.config.duplex.preserve_truncation_context;
            self.interrupt_response(fade_out_ms, preserve).await;
        }

        let prefix = self
            .last_truncation
            .take()
            .map(|truncation| generate_acknowledgment_prefix(&truncation, &prompt))
            .unwrap_or("");
        let request = GenerationRequest::new(prompt.as_str())
            .with_continuation(self.continuation_context.take());

        let (source, latency_saved) = match self.speculation.confirm(&prompt) {
            SpeculationOutcome::Confirmed(confirmed) => (
                ResponseSource::Speculative(confirmed.handle),
                Some(confirmed.latency_saved),
            ),
            SpeculationOutcome::Diverged { divergence } => {
                tracing::debug!(divergence, "Speculation diverged, generating fresh");
                (ResponseSource::Fresh, None)
            }
            SpeculationOutcome::Unavailable => (ResponseSource::Fresh, None),
        };
        self.speculation.reset();
        self.speculation.set_continuation_context(None);
        self.context.push(prompt.as_str());

        let id = uuid::Uuid::new_v4().to_string();
        let cancel = self.cancel.child_token();
        tracing::info!(
            response_id = %id,
            speculative = latency_saved.is_some(),
            "Responding"
        );

        self.response = Some(ActiveResponse {
            id: id.clone(),
            text: String::new(),
            cancel: cancel.clone(),
            speculative: latency_saved.is_some(),
            latency_saved: latency_saved.unwrap_or_default(),
            first_audio: None,
            audio_ms: 0,
            finished: false,
        });

        let task = ResponseTask {
            id,
            source,
            request,
            generator: Arc::clone(&self.generator),
            synthesizer: Arc::clone(&self.synthesizer),
            prefix,
            updates: self.commands.clone(),
            cancel,
        };
        tokio::spawn(task.run());
    }

    // ------------------------------------------------------------------------
    // Duplex and barge-in
    // ------------------------------------------------------------------------

    async fn handle_speech(&mut self, event: SpeechDetectedEvent) {
        let decision = self
            .duplex
            .handle_user_speech_detected(event.confidence, event.duration_ms);
        match decision {
            SpeechDecision::Suppressed => {}
            SpeechDecision::Listening => {
                // Still talking: push a pending reply back. A transcript
                // re-arms or clears it; noise alone must not strand the turn.
                if self.respond_at.is_some() {
                    self.respond_at = Some(Instant::now() + self.respond_wait);
                }
            }
            SpeechDecision::BelowThreshold => {
                tracing::trace!(confidence = event.confidence, "Speech during playback ignored");
            }
            SpeechDecision::BargeIn {
                fade_out_ms,
                preserve_context,
            } => {
                tracing::info!(
                    confidence = event.confidence,
                    duration_ms = event.duration_ms,
                    "Barge-in"
                );
                self.respond_at = None;
                self.speculation.cancel();
                self.interrupt_response(fade_out_ms, preserve_context).await;
            }
        }
    }

    /// Cancel the active response and report how much of it was heard.
    async fn interrupt_response(&mut self, fade_out_ms: u64, preserve_context: bool) {
        let Some(active) = self.response.take() else {
            return;
        };
        active.cancel.cancel();
        self.playback_end = None;

        let now = Instant::now();
        let spoken = if self.duplex.is_playback_active() {
            self.duplex.spoken_chars_at(now)
        } else {
            0
        };
        let result = self.truncation.find_truncation_point(&active.text, spoken);
        if self.duplex.is_playback_active() {
            self.update_duplex(|duplex| duplex.stop_speaking_at(true, now)).await;
        }

        tracing::debug!(
            response_id = %active.id,
            spoken_chars = spoken,
            truncation_type = ?result.truncation_type,
            "Response truncated"
        );

        let mut event = ResponseTruncatedEvent::from_result(active.id.as_str(), &result);
        event.fade_out_ms = fade_out_ms;
        self.emit(&event).await;

        self.continuation_context = if preserve_context {
            result.continuation_context.clone()
        } else {
            None
        };
        self.speculation
            .set_continuation_context(self.continuation_context.clone());
        self.last_truncation = Some(result);
    }

    async fn handle_playback_complete(&mut self) {
        match self.response.as_ref().map(|active| active.finished) {
            Some(true) => self.finish_playback().await,
            Some(false) => tracing::debug!("Playback complete before response finished, ignoring"),
            None => {}
        }
    }

    /// Estimated playback end reached. More audio may still be coming.
    async fn playback_elapsed(&mut self) {
        self.playback_end = None;
        if self.response.as_ref().is_some_and(|active| active.finished) {
            self.finish_playback().await;
        }
    }

    async fn finish_playback(&mut self) {
        self.response = None;
        self.playback_end = None;
        if self.duplex.is_playback_active() {
            self.update_duplex(|duplex| duplex.stop_speaking(false)).await;
        }
    }

    // ------------------------------------------------------------------------
    // Response updates
    // ------------------------------------------------------------------------

    async fn handle_response(&mut self, id: String, update: ResponseUpdate) {
        let Some(active) = self.response.as_mut().filter(|active| active.id == id) else {
            tracing::trace!(response_id = %id, "Dropping update for stale response");
            return;
        };

        match update {
            ResponseUpdate::Delta(text) => {
                active.text.push_str(&text);
                self.emit(&ResponseDeltaEvent {
                    response_id: id,
                    text,
                })
                .await;
            }
            ResponseUpdate::Audio { pcm, text } => {
                let now = Instant::now();
                let first_chunk = active.first_audio.is_none();
                let started = *active.first_audio.get_or_insert(now);
                active.audio_ms += pcm_duration_ms(pcm.len(), OUTPUT_SAMPLE_RATE);
                self.playback_end = Some(started + Duration::from_millis(active.audio_ms));

                if first_chunk {
                    self.update_duplex(|duplex| duplex.start_speaking_at(now)).await;
                }
                self.send(Outgoing::Audio {
                    response_id: id,
                    pcm,
                    text,
                })
                .await;
            }
            ResponseUpdate::SynthesisFailed(message) => {
                self.emit(&ErrorEvent::new("synthesis_failed", message)).await;
            }
            ResponseUpdate::Finished(status) => {
                active.finished = true;
                let complete = ResponseCompleteEvent {
                    response_id: id,
                    text: active.text.clone(),
                    speculative: active.speculative,
                    latency_saved_ms: active.latency_saved.as_millis() as u64,
                };
                let audio_started = active.first_audio.is_some();

                if status == GenerationStatus::Failed {
                    self.emit(&ErrorEvent::new(
                        "generation_failed",
                        "response generator failed",
                    ))
                    .await;
                }
                self.emit(&complete).await;

                let playback_done = self.playback_end.map_or(true, |end| end <= Instant::now());
                if !audio_started || playback_done {
                    self.finish_playback().await;
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------------

    /// Apply a duplex change and tell the client when the mode moved.
    async fn update_duplex(&mut self, change: impl FnOnce(&mut DuplexCoordinator)) {
        let from = self.duplex.mode();
        change(&mut self.duplex);
        let to = self.duplex.mode();
        if from == to {
            return;
        }
        self.emit(&StateChangeEvent {
            from,
            to,
            vad_threshold: self.duplex.vad_threshold(),
            ts_ms: now_ms(),
        })
        .await;
    }

    async fn emit<E: ControlEvent>(&self, event: &E) {
        match event.to_data() {
            Ok(data) => self.send(Outgoing::Control { kind: E::NAME, data }).await,
            Err(e) => tracing::warn!(kind = E::NAME, error = %e, "Failed to serialize event"),
        }
    }

    async fn send(&self, item: Outgoing) {
        if self.outgoing.send(item).await.is_err() {
            tracing::debug!("Outbound channel closed");
        }
    }

    fn teardown(&mut self) {
        if let Some(active) = self.response.take() {
            active.cancel.cancel();
        }
        let stats = self.speculation.stats().clone();
        self.speculation.reset();
        self.duplex.reset();
        tracing::info!(
            speculations = stats.started,
            confirmed = stats.confirmed,
            diverged = stats.diverged,
            latency_saved_ms = stats.latency_saved.as_millis() as u64,
            "Session actor stopped"
        );
    }
}

/// The turn so far plus the newest transcript.
fn join_turn(committed: &str, latest: &str) -> String {
    match (committed.trim(), latest.trim()) {
        ("", latest) => latest.to_string(),
        (committed, "") => committed.to_string(),
        (committed, latest) => format!("{committed} {latest}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_turn() {
        assert_eq!(join_turn("", "hello"), "hello");
        assert_eq!(join_turn("I want", "a pizza"), "I want a pizza");
        assert_eq!(join_turn("I want ", "  "), "I want");
    }
}
