//! Full-duplex playback/listening coordination.
//!
//! Tracks whether output audio is playing, absorbs tail-end echo right after
//! playback stops, and decides when detected user speech is a real barge-in.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplexMode {
    #[default]
    Idle,
    Listening,
    Speaking,
    Duplex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplexConfig {
    pub barge_in_enabled: bool,
    /// Minimum VAD confidence for speech during playback to interrupt it.
    pub barge_in_min_confidence: f32,
    /// Minimum speech duration during playback to interrupt it.
    pub barge_in_min_duration_ms: u64,
    /// Confidence the caller's VAD uses while nothing is playing.
    pub baseline_listen_threshold: f32,
    /// Window after playback stops in which detected speech is treated as echo.
    pub echo_tail_ms: u64,
    pub fade_out_ms: u64,
    pub preserve_truncation_context: bool,
    /// Speaking rate for estimating audible characters from elapsed playback.
    pub chars_per_second: f32,
}

impl Default for DuplexConfig {
    fn default() -> Self {
        Self {
            barge_in_enabled: true,
            barge_in_min_confidence: 0.7,
            barge_in_min_duration_ms: 150,
            baseline_listen_threshold: 0.5,
            echo_tail_ms: 200,
            fade_out_ms: 50,
            preserve_truncation_context: true,
            chars_per_second: 15.0,
        }
    }
}

/// Snapshot of the per-session duplex state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplexState {
    pub mode: DuplexMode,
    pub is_playback_active: bool,
    pub last_playback_end: Option<Instant>,
    pub spoken_char_approx: usize,
}

/// What to do about user speech reported by the VAD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeechDecision {
    /// Inside the post-playback echo window.
    Suppressed,
    /// Nothing is playing; ordinary listening.
    Listening,
    /// Playback is active but the speech is too weak or short, or barge-in is off.
    BelowThreshold,
    BargeIn {
        fade_out_ms: u64,
        preserve_context: bool,
    },
}

impl SpeechDecision {
    pub fn is_barge_in(&self) -> bool {
        matches!(self, Self::BargeIn { .. })
    }
}

/// Single-owner duplex state machine for one session.
#[derive(Debug)]
pub struct DuplexCoordinator {
    config: DuplexConfig,
    state: DuplexState,
    listening: bool,
    playback_started: Option<Instant>,
    /// Precise count reported by the client, overrides the time estimate.
    precise_spoken_chars: Option<usize>,
    interruptions: u64,
}

impl Default for DuplexCoordinator {
    fn default() -> Self {
        Self::new(DuplexConfig::default())
    }
}

impl DuplexCoordinator {
    pub fn new(config: DuplexConfig) -> Self {
        Self {
            config,
            state: DuplexState::default(),
            listening: false,
            playback_started: None,
            precise_spoken_chars: None,
            interruptions: 0,
        }
    }

    pub fn config(&self) -> &DuplexConfig {
        &self.config
    }

    pub fn state(&self) -> &DuplexState {
        &self.state
    }

    pub fn mode(&self) -> DuplexMode {
        self.state.mode
    }

    pub fn is_playback_active(&self) -> bool {
        self.state.is_playback_active
    }

    /// Number of barge-ins accepted this session.
    pub fn interruptions(&self) -> u64 {
        self.interruptions
    }

    /// VAD threshold the caller should apply right now.
    pub fn vad_threshold(&self) -> f32 {
        if self.state.is_playback_active {
            self.config.barge_in_min_confidence
        } else {
            self.config.baseline_listen_threshold
        }
    }

    /// Begin listening (session start).
    pub fn start_listening(&mut self) {
        self.listening = true;
        let next = match self.state.mode {
            DuplexMode::Idle | DuplexMode::Listening => DuplexMode::Listening,
            DuplexMode::Speaking | DuplexMode::Duplex => DuplexMode::Duplex,
        };
        self.transition(next);
    }

    pub fn start_speaking(&mut self) {
        self.start_speaking_at(Instant::now());
    }

    pub fn start_speaking_at(&mut self, now: Instant) {
        self.state.is_playback_active = true;
        self.state.spoken_char_approx = 0;
        self.playback_started = Some(now);
        self.precise_spoken_chars = None;
        let next = if self.listening {
            DuplexMode::Duplex
        } else {
            DuplexMode::Speaking
        };
        self.transition(next);
    }

    pub fn stop_speaking(&mut self, was_interrupted: bool) {
        self.stop_speaking_at(was_interrupted, Instant::now());
    }

    pub fn stop_speaking_at(&mut self, was_interrupted: bool, now: Instant) {
        if !self.state.is_playback_active {
            return;
        }
        self.state.spoken_char_approx = self.spoken_chars_at(now);
        self.state.is_playback_active = false;
        self.state.last_playback_end = Some(now);
        self.playback_started = None;
        // Playback stop always returns the session to listening.
        self.listening = true;
        self.transition(DuplexMode::Listening);
        tracing::debug!(
            was_interrupted,
            spoken_chars = self.state.spoken_char_approx,
            "Playback stopped"
        );
    }

    /// Record a precise audible-character count reported by the client.
    pub fn record_spoken_chars(&mut self, chars: usize) {
        if self.state.is_playback_active {
            self.precise_spoken_chars = Some(chars);
            self.state.spoken_char_approx = chars;
        }
    }

    /// Characters of the current response estimated as already audible.
    pub fn spoken_chars_at(&self, now: Instant) -> usize {
        if let Some(precise) = self.precise_spoken_chars {
            return precise;
        }
        match self.playback_started {
            Some(started) => {
                let elapsed = now.saturating_duration_since(started);
                (elapsed.as_secs_f32() * self.config.chars_per_second).floor() as usize
            }
            None => self.state.spoken_char_approx,
        }
    }

    pub fn should_suppress_vad(&self) -> bool {
        self.should_suppress_vad_at(Instant::now())
    }

    /// True only inside the echo window right after playback ends.
    ///
    /// During playback VAD keeps running; the caller raises its threshold
    /// instead (see [`Self::vad_threshold`]).
    pub fn should_suppress_vad_at(&self, now: Instant) -> bool {
        if self.state.is_playback_active {
            return false;
        }
        match self.state.last_playback_end {
            Some(ended) => {
                now.saturating_duration_since(ended) < Duration::from_millis(self.config.echo_tail_ms)
            }
            None => false,
        }
    }

    pub fn handle_user_speech_detected(&mut self, confidence: f32, duration_ms: u64) -> SpeechDecision {
        self.handle_user_speech_detected_at(confidence, duration_ms, Instant::now())
    }

    pub fn handle_user_speech_detected_at(
        &mut self,
        confidence: f32,
        duration_ms: u64,
        now: Instant,
    ) -> SpeechDecision {
        if self.should_suppress_vad_at(now) {
            tracing::trace!(confidence, duration_ms, "Speech inside echo window, suppressed");
            return SpeechDecision::Suppressed;
        }
        if !self.state.is_playback_active {
            return SpeechDecision::Listening;
        }
        if self.config.barge_in_enabled
            && confidence >= self.config.barge_in_min_confidence
            && duration_ms >= self.config.barge_in_min_duration_ms
        {
            self.interruptions += 1;
            self.state.spoken_char_approx = self.spoken_chars_at(now);
            tracing::debug!(
                confidence,
                duration_ms,
                spoken_chars = self.state.spoken_char_approx,
                "Barge-in detected"
            );
            return SpeechDecision::BargeIn {
                fade_out_ms: self.config.fade_out_ms,
                preserve_context: self.config.preserve_truncation_context,
            };
        }
        SpeechDecision::BelowThreshold
    }

    /// Reset for session end.
    pub fn reset(&mut self) {
        self.state = DuplexState::default();
        self.listening = false;
        self.playback_started = None;
        self.precise_spoken_chars = None;
        self.interruptions = 0;
    }

    fn transition(&mut self, next: DuplexMode) {
        if self.state.mode != next {
            tracing::debug!(from = ?self.state.mode, to = ?next, "Duplex mode changed");
            self.state.mode = next;
        }
    }
}
