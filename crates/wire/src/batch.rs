//! Outbound batching of high-frequency control messages.

use std::time::{Duration, Instant};

use parley_events::event_names;
use serde::{Deserialize, Serialize};

use crate::message::{ControlMessage, Envelope};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub enabled: bool,
    pub window_ms: u64,
    pub max_messages: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 50,
            max_messages: 20,
        }
    }
}

/// Types that may open or extend a batch.
pub fn is_batchable(kind: &str) -> bool {
    matches!(
        kind,
        event_names::RESPONSE_DELTA | event_names::TRANSCRIPT_DELTA | event_names::AUDIO_OUTPUT_META
    )
}

/// Types that close any pending batch immediately.
pub fn is_flush_trigger(kind: &str) -> bool {
    matches!(
        kind,
        event_names::RESPONSE_COMPLETE
            | event_names::RESPONSE_TRUNCATED
            | event_names::STATE_CHANGE
            | event_names::ERROR
    )
}

/// Coalesces messages into batch envelopes.
///
/// Batchable messages open a window. Any message pushed while a window is
/// open joins it so sequence order is kept; flush triggers close it at once.
/// Outside a window non-batchable messages go out on their own.
#[derive(Debug)]
pub struct Batcher {
    config: BatchConfig,
    pending: Vec<ControlMessage>,
    opened_at: Option<Instant>,
}

impl Batcher {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            pending: Vec::new(),
            opened_at: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// When the open window expires, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at
            .map(|opened| opened + Duration::from_millis(self.config.window_ms))
    }

    /// Queue a message; returns whatever must be sent now, in order.
    pub fn push(&mut self, message: ControlMessage, now: Instant) -> Vec<Envelope> {
        if !self.config.enabled {
            let mut out: Vec<Envelope> = self.flush().into_iter().collect();
            out.push(Envelope::Single(message));
            return out;
        }

        let trigger = is_flush_trigger(&message.kind);
        let window_open = !self.pending.is_empty();

        if !window_open && !is_batchable(&message.kind) {
            return vec![Envelope::Single(message)];
        }

        self.pending.push(message);
        if self.opened_at.is_none() {
            self.opened_at = Some(now);
        }

        if trigger || self.pending.len() >= self.config.max_messages {
            return self.flush().into_iter().collect();
        }
        Vec::new()
    }

    /// Flush when the window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<Envelope> {
        match self.deadline() {
            Some(deadline) if now >= deadline => self.flush(),
            _ => None,
        }
    }

    /// Flush unconditionally (teardown).
    pub fn drain(&mut self) -> Option<Envelope> {
        self.flush()
    }

    fn flush(&mut self) -> Option<Envelope> {
        self.opened_at = None;
        let mut messages = std::mem::take(&mut self.pending);
        match messages.len() {
            0 => None,
            1 => messages.pop().map(Envelope::Single),
            _ => Some(Envelope::Batch(messages)),
        }
    }
}
